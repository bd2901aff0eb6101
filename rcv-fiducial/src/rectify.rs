use image::GrayImage;

/// Bilinear intensity sample with clamped border extension.
///
/// Coordinates outside the image sample the nearest edge pixel, which is the
/// boundary policy the rectification path wants: a candidate quad touching
/// the image edge should see extended border pixels, not zeros.
pub(crate) fn sample_bilinear(image: &GrayImage, x: f64, y: f64) -> f64 {
    let width = image.width() as i64;
    let height = image.height() as i64;
    let clamp = |v: i64, upper: i64| v.max(0).min(upper - 1);

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let fetch = |xi: i64, yi: i64| {
        image.get_pixel(clamp(xi, width) as u32, clamp(yi, height) as u32)[0] as f64
    };
    let top = fetch(x0, y0) * (1.0 - fx) + fetch(x0 + 1, y0) * fx;
    let bottom = fetch(x0, y0 + 1) * (1.0 - fx) + fetch(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resamples the source image into a `size`×`size` buffer.
///
/// `map` takes the center of a destination pixel and produces the source
/// pixel coordinates to sample; for fiducial rectification it is the
/// refined homography composed with the lens redistortion. A destination
/// pixel whose mapping fails samples as black.
pub fn rectify_square(
    image: &GrayImage,
    size: u32,
    mut map: impl FnMut(f64, f64) -> Option<(f64, f64)>,
) -> GrayImage {
    let mut output = GrayImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let value = map(x as f64 + 0.5, y as f64 + 0.5)
                .map(|(sx, sy)| sample_bilinear(image, sx, sy))
                .unwrap_or(0.0);
            output.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(0, 0, image::Luma([0]));
        image.put_pixel(1, 0, image::Luma([100]));
        assert!((sample_bilinear(&image, 0.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((sample_bilinear(&image, 0.5, 0.0) - 50.0).abs() < 1e-9);
        assert!((sample_bilinear(&image, 1.0, 0.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_bounds_clamps_to_edge() {
        let mut image = GrayImage::new(2, 2);
        for (x, y, v) in [(0, 0, 10), (1, 0, 20), (0, 1, 30), (1, 1, 40)] {
            image.put_pixel(x, y, image::Luma([v]));
        }
        assert!((sample_bilinear(&image, -5.0, -5.0) - 10.0).abs() < 1e-9);
        assert!((sample_bilinear(&image, 10.0, 10.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn identity_mapping_copies_the_image() {
        let mut image = GrayImage::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                image.put_pixel(x, y, image::Luma([(x * 16 + y) as u8]));
            }
        }
        let copied = rectify_square(&image, 4, |x, y| Some((x - 0.5, y - 0.5)));
        assert_eq!(image, copied);
    }
}
