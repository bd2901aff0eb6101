use crate::decode::Decoder;
use crate::rectify::rectify_square;
use crate::{FiducialError, FoundFiducial, QuadPoseEstimator, Quadrilateral};
use four_point::FourPoint;
use image::GrayImage;
use log::{debug, trace};
use nalgebra::Point2;
use rcv_core::{CameraModel, FeatureMatch, KeyPoint};
use rcv_optimize::refine_homography;
use rcv_pinhole::CameraIntrinsicsK1Distortion;

/// A candidate quadrilateral produced by the external polygon/contour
/// detector, in undistorted pixel coordinates, along with that detector's
/// estimate of the image intensity just inside and just outside the
/// boundary edge.
#[derive(Debug, Clone, Copy)]
pub struct CandidateQuad {
    /// The ordered boundary corners, in undistorted pixels.
    pub quad: Quadrilateral,
    /// Mean intensity just inside the boundary (the dark side of a marker
    /// border).
    pub edge_inside: f64,
    /// Mean intensity just outside the boundary.
    pub edge_outside: f64,
}

/// Configuration of [`SquareFiducialDetector`].
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Side length of the square rectification buffer, in pixels.
    pub square_pixels: u32,
    /// Width of the marker's black border band as a fraction of the marker
    /// side. Must lie strictly between 0 and 0.5.
    pub border_fraction: f64,
    /// Minimum fraction of border pixels that must classify as black for a
    /// candidate to survive border validation.
    pub min_border_fraction: f64,
    /// Physical side length of the marker square; poses are reported in the
    /// same unit.
    pub fiducial_width: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            square_pixels: 64,
            border_fraction: 0.25,
            min_border_fraction: 0.65,
            fiducial_width: 1.0,
        }
    }
}

/// Detects square fiducials from candidate quadrilaterals in a frame:
/// homography rectification, border validation, pattern decoding, and pose
/// estimation.
///
/// The instance reuses internal scratch state across frames and is not safe
/// for concurrent use from multiple threads.
pub struct SquareFiducialDetector {
    config: DetectorConfig,
    decoder: Decoder,
    intrinsics: CameraIntrinsicsK1Distortion,
    four_point: FourPoint,
    pose_estimator: QuadPoseEstimator,
    found: Vec<FoundFiducial>,
}

impl SquareFiducialDetector {
    /// Creates the detector.
    ///
    /// Configuration is validated here and nowhere else: an invalid grid
    /// width, border fraction, or rectification size is a construction-time
    /// error, while at runtime bad candidates are silently skipped.
    pub fn new(
        config: DetectorConfig,
        decoder: Decoder,
        intrinsics: CameraIntrinsicsK1Distortion,
    ) -> Result<Self, FiducialError> {
        if !(config.border_fraction > 0.0 && config.border_fraction < 0.5) {
            return Err(FiducialError::InvalidBorderFraction(config.border_fraction));
        }
        let border = (config.border_fraction * config.square_pixels as f64).round() as u32;
        let interior = config.square_pixels.saturating_sub(2 * border);
        if border == 0 || (interior as usize) < decoder.grid_width() {
            return Err(FiducialError::InvalidSquareSize(config.square_pixels));
        }
        let mut pose_estimator = QuadPoseEstimator::new();
        pose_estimator.set_fiducial(config.fiducial_width / 2.0, config.fiducial_width / 2.0);
        pose_estimator.set_lens_distortion(intrinsics);
        Ok(Self {
            config,
            decoder,
            intrinsics,
            four_point: FourPoint::new(),
            pose_estimator,
            found: Vec::new(),
        })
    }

    /// Processes one frame's candidates. The accepted detections replace the
    /// previous frame's and are available from
    /// [`SquareFiducialDetector::found`].
    pub fn process(&mut self, image: &GrayImage, candidates: &[CandidateQuad]) {
        self.found.clear();
        for (index, candidate) in candidates.iter().enumerate() {
            match self.process_candidate(image, candidate) {
                Some(found) => self.found.push(found),
                None => trace!("candidate {} rejected", index),
            }
        }
        debug!(
            "accepted {} of {} candidate quads",
            self.found.len(),
            candidates.len()
        );
    }

    /// The detections accepted by the last [`SquareFiducialDetector::process`]
    /// call.
    pub fn found(&self) -> &[FoundFiducial] {
        &self.found
    }

    fn process_candidate(
        &mut self,
        image: &GrayImage,
        candidate: &CandidateQuad,
    ) -> Option<FoundFiducial> {
        let size = self.config.square_pixels;
        let corners = candidate.quad.corners();

        // Homography from the canonical square onto the candidate, linear
        // then refined. A refinement failure keeps the linear estimate.
        let canonical = [
            Point2::new(0.0, 0.0),
            Point2::new(size as f64, 0.0),
            Point2::new(size as f64, size as f64),
            Point2::new(0.0, size as f64),
        ];
        let matches: Vec<FeatureMatch<KeyPoint>> = canonical
            .iter()
            .zip(corners.iter())
            .map(|(&c, &q)| FeatureMatch(KeyPoint(c), KeyPoint(q)))
            .collect();
        let linear = match self.four_point.from_matches(matches.iter()) {
            Some(h) => h,
            None => {
                debug!("rejecting candidate: degenerate homography");
                return None;
            }
        };
        let homography = refine_homography(linear, &matches).unwrap_or(linear);

        // Resample the marker square out of the distorted source image: the
        // homography produces undistorted pixels, which the lens model then
        // maps back into the original image.
        let intrinsics = self.intrinsics;
        let rectified = rectify_square(image, size, |x, y| {
            let undistorted = homography.transform(Point2::new(x, y))?;
            let distorted = intrinsics
                .uncalibrate(intrinsics.simple_intrinsics.calibrate(KeyPoint(undistorted)));
            Some((distorted.x, distorted.y))
        });

        let threshold = (candidate.edge_inside + candidate.edge_outside) / 2.0;
        let border_fraction =
            border_black_fraction(&rectified, self.border_pixels(), threshold);
        if border_fraction < self.config.min_border_fraction {
            debug!(
                "rejecting candidate: border blackness {:.3} below {:.3}",
                border_fraction, self.config.min_border_fraction
            );
            return None;
        }

        let fractions = self.cell_black_fractions(&rectified, threshold);
        let decoding = self.decoder.decode(&fractions)?;

        // Rotate the *output* corner order so the reported quad matches the
        // canonical pattern orientation, then hand distorted-pixel corners
        // to the pose estimator.
        let oriented = candidate.quad.rotate(decoding.rotation);
        let distorted = Quadrilateral(oriented.corners().map(|c| {
            self.intrinsics
                .uncalibrate(self.intrinsics.simple_intrinsics.calibrate(KeyPoint(c)))
                .0
        }));
        if !self.pose_estimator.process(&distorted) {
            debug!("rejecting candidate: pose estimation failed");
            return None;
        }

        Some(FoundFiducial {
            id: decoding.id,
            rotation: decoding.rotation,
            pose: self.pose_estimator.world_to_camera()?,
            error: self.pose_estimator.error()?,
            quad: distorted,
        })
    }

    fn border_pixels(&self) -> u32 {
        (self.config.border_fraction * self.config.square_pixels as f64).round() as u32
    }

    /// Fraction of black pixels per interior grid cell, raster order.
    fn cell_black_fractions(&self, rectified: &GrayImage, threshold: f64) -> Vec<f64> {
        let n = self.decoder.grid_width();
        let border = self.border_pixels();
        let interior = self.config.square_pixels - 2 * border;
        let cell_size = interior as f64 / n as f64;
        let mut fractions = vec![0.0; n * n];
        for (ix, fraction) in fractions.iter_mut().enumerate() {
            let r = ix / n;
            let c = ix % n;
            let x0 = border + (c as f64 * cell_size) as u32;
            let x1 = border + ((c + 1) as f64 * cell_size) as u32;
            let y0 = border + (r as f64 * cell_size) as u32;
            let y1 = border + ((r + 1) as f64 * cell_size) as u32;
            let mut black = 0usize;
            let mut total = 0usize;
            for y in y0..y1.max(y0 + 1) {
                for x in x0..x1.max(x0 + 1) {
                    total += 1;
                    if (rectified.get_pixel(x, y)[0] as f64) < threshold {
                        black += 1;
                    }
                }
            }
            *fraction = black as f64 / total as f64;
        }
        fractions
    }
}

/// Fraction of pixels in the outer border band classified as black.
pub(crate) fn border_black_fraction(rectified: &GrayImage, border: u32, threshold: f64) -> f64 {
    let size = rectified.width();
    let mut black = 0usize;
    let mut total = 0usize;
    for y in 0..size {
        for x in 0..size {
            let in_band = x < border || y < border || x >= size - border || y >= size - border;
            if !in_band {
                continue;
            }
            total += 1;
            if (rectified.get_pixel(x, y)[0] as f64) < threshold {
                black += 1;
            }
        }
    }
    black as f64 / total as f64
}
