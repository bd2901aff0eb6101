use crate::FiducialError;
use image::GrayImage;
use log::debug;

/// The result of decoding a rectified fiducial interior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDecoding {
    /// The decoded identifier: the binary grid value, or the library index
    /// of the matched template.
    pub id: u64,
    /// Number of clockwise quarter turns separating the observed pattern
    /// from its canonical orientation, in `0..4`: the observation equals the
    /// canonical pattern rotated clockwise this many times.
    pub rotation: usize,
}

/// Index into the original cell raster that position `(r, c)` reads after
/// `quarter_turns` clockwise rotations of the grid.
///
/// Rotation state is tracked by this remapping rather than by physically
/// shuffling the cell array, so the rotation count can never drift from the
/// data.
fn source_index(n: usize, quarter_turns: usize, mut r: usize, mut c: usize) -> usize {
    for _ in 0..(quarter_turns % 4) {
        let rotated = (n - 1 - c, r);
        r = rotated.0;
        c = rotated.1;
    }
    r * n + c
}

/// The cell raster after `quarter_turns` clockwise rotations.
fn rotate_cells(cells: &[bool], n: usize, quarter_turns: usize) -> Vec<bool> {
    let mut rotated = vec![false; cells.len()];
    for r in 0..n {
        for c in 0..n {
            rotated[r * n + c] = cells[source_index(n, quarter_turns, r, c)];
        }
    }
    rotated
}

fn validate_grid_width(grid_width: usize) -> Result<(), FiducialError> {
    if !(3..=8).contains(&grid_width) {
        return Err(FiducialError::InvalidGridWidth(grid_width));
    }
    Ok(())
}

/// The interchangeable pattern decoding strategies of the detection
/// pipeline.
///
/// Both operate on the same input: the fraction of black pixels in each
/// interior grid cell, in raster order.
pub enum Decoder {
    /// Decode the cells as a binary number with an orientation corner.
    BinaryGrid(BinaryGridDecoder),
    /// Match the cells against a library of registered patterns.
    Template(TemplateLibrary),
}

impl Decoder {
    pub(crate) fn grid_width(&self) -> usize {
        match self {
            Decoder::BinaryGrid(decoder) => decoder.grid_width,
            Decoder::Template(library) => library.grid_width,
        }
    }

    pub(crate) fn decode(&self, black_fractions: &[f64]) -> Option<GridDecoding> {
        match self {
            Decoder::BinaryGrid(decoder) => decoder.decode(black_fractions),
            Decoder::Template(library) => library.decode(black_fractions),
        }
    }
}

/// Decodes an `N`×`N` binary grid with one black orientation corner.
///
/// Cells are classified black or white only when their black-pixel fraction
/// is clear of a symmetric ambiguity band around `0.5`; a single ambiguous
/// cell rejects the whole candidate rather than guessing. Exactly one of the
/// four corner cells must be black; the grid is rotated (by index remapping)
/// until that corner sits top-left and the remaining cells are read in
/// raster order, most significant bit first, skipping the four corners.
#[derive(Debug, Clone, Copy)]
pub struct BinaryGridDecoder {
    grid_width: usize,
    ambiguity_threshold: f64,
}

impl BinaryGridDecoder {
    /// Creates a decoder for an `grid_width`×`grid_width` grid.
    ///
    /// Fails fast on a grid width outside `[3, 8]` or an ambiguity threshold
    /// outside `(0, 1)`.
    pub fn new(grid_width: usize, ambiguity_threshold: f64) -> Result<Self, FiducialError> {
        validate_grid_width(grid_width)?;
        if !(ambiguity_threshold > 0.0 && ambiguity_threshold < 1.0) {
            return Err(FiducialError::InvalidAmbiguityThreshold(ambiguity_threshold));
        }
        Ok(Self {
            grid_width,
            ambiguity_threshold,
        })
    }

    /// Number of identifier bits the grid carries.
    pub fn data_bits(&self) -> usize {
        self.grid_width * self.grid_width - 4
    }

    fn classify(&self, black_fraction: f64) -> Option<bool> {
        let band = self.ambiguity_threshold / 2.0;
        if black_fraction >= 0.5 + band {
            Some(true)
        } else if black_fraction <= 0.5 - band {
            Some(false)
        } else {
            None
        }
    }

    fn decode(&self, black_fractions: &[f64]) -> Option<GridDecoding> {
        let n = self.grid_width;
        debug_assert_eq!(black_fractions.len(), n * n);
        let mut cells = Vec::with_capacity(n * n);
        for &fraction in black_fractions {
            match self.classify(fraction) {
                Some(cell) => cells.push(cell),
                None => {
                    debug!("rejecting candidate: ambiguous cell fraction {}", fraction);
                    return None;
                }
            }
        }
        decode_cells(&cells, n)
    }
}

/// Decodes classified cells: orientation corner, rotation count, identifier.
fn decode_cells(cells: &[bool], n: usize) -> Option<GridDecoding> {
    // A clockwise rotation carries the canonical top-left orientation corner
    // through top-right, bottom-right, bottom-left, so the corner the black
    // cell lands on encodes how far from canonical the observation is.
    let corner_rotations = [
        (0, 0, 0),
        (0, n - 1, 1),
        (n - 1, n - 1, 2),
        (n - 1, 0, 3),
    ];
    let black_corners: Vec<usize> = corner_rotations
        .iter()
        .filter(|&&(r, c, _)| cells[r * n + c])
        .map(|&(_, _, rotation)| rotation)
        .collect();
    if black_corners.len() != 1 {
        debug!(
            "rejecting candidate: {} black orientation corners",
            black_corners.len()
        );
        return None;
    }
    let rotation = black_corners[0];

    // Undo the observed rotation while reading the identifier bits.
    let unrotate = (4 - rotation) % 4;
    let mut id: u64 = 0;
    for r in 0..n {
        for c in 0..n {
            let corner = (r == 0 || r == n - 1) && (c == 0 || c == n - 1);
            if corner {
                continue;
            }
            let bit = cells[source_index(n, unrotate, r, c)];
            id = (id << 1) | bit as u64;
        }
    }
    Some(GridDecoding { id, rotation })
}

/// Encodes an identifier into the canonical cell raster of an `N`×`N` grid:
/// orientation corner top-left, identifier bits raster order most
/// significant first, corner cells skipped.
///
/// This is the exact inverse of the binary grid decoder at rotation zero.
pub fn encode_grid_cells(id: u64, grid_width: usize) -> Result<Vec<bool>, FiducialError> {
    validate_grid_width(grid_width)?;
    let n = grid_width;
    let bits = n * n - 4;
    if bits < 64 && id >= 1u64 << bits {
        return Err(FiducialError::IdOutOfRange { id, bits });
    }
    let mut cells = vec![false; n * n];
    cells[0] = true;
    let mut remaining = bits;
    for r in 0..n {
        for c in 0..n {
            let corner = (r == 0 || r == n - 1) && (c == 0 || c == n - 1);
            if corner {
                continue;
            }
            remaining -= 1;
            cells[r * n + c] = (id >> remaining) & 1 == 1;
        }
    }
    Ok(cells)
}

/// Renders a marker cell raster into a synthetic square image with a black
/// border band: black cells are 0, white cells 255.
///
/// The layout matches what the detector's rectification stage produces, so
/// this is the encoding counterpart used to exercise the full decode path.
pub fn render_marker_image(
    cells: &[bool],
    grid_width: usize,
    square_pixels: u32,
    border_fraction: f64,
) -> GrayImage {
    let size = square_pixels;
    let border = (border_fraction * size as f64).round() as u32;
    let interior = size - 2 * border;
    let cell_size = interior as f64 / grid_width as f64;
    let mut image = GrayImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let value = if x < border || y < border || x >= size - border || y >= size - border {
                0u8
            } else {
                let r = ((y - border) as f64 / cell_size) as usize;
                let c = ((x - border) as f64 / cell_size) as usize;
                let r = r.min(grid_width - 1);
                let c = c.min(grid_width - 1);
                if cells[r * grid_width + c] {
                    0
                } else {
                    255
                }
            };
            image.put_pixel(x, y, image::Luma([value]));
        }
    }
    image
}

/// A library of registered template patterns.
///
/// Each registered pattern is stored packed into machine words in all four
/// rotations, so matching a rectified observation is four Hamming distances
/// per pattern. The best-scoring pattern/rotation pair wins (first found on
/// ties) and is accepted when its distance is within
/// [`TemplateLibrary::max_error_fraction`] of the total bit count.
pub struct TemplateLibrary {
    grid_width: usize,
    /// Fraction of mismatched bits tolerated for a match.
    pub max_error_fraction: f64,
    patterns: Vec<[Vec<u64>; 4]>,
}

impl TemplateLibrary {
    /// Creates an empty library for `grid_width`×`grid_width` patterns.
    ///
    /// Fails fast on a grid width outside `[3, 8]` or an error fraction
    /// outside `[0, 1)`.
    pub fn new(grid_width: usize, max_error_fraction: f64) -> Result<Self, FiducialError> {
        validate_grid_width(grid_width)?;
        if !(0.0..1.0).contains(&max_error_fraction) {
            return Err(FiducialError::InvalidAmbiguityThreshold(max_error_fraction));
        }
        Ok(Self {
            grid_width,
            max_error_fraction,
            patterns: Vec::new(),
        })
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Registers a pattern and returns its identifier (the library index).
    ///
    /// `cells` is the canonical-orientation raster, `true` for black.
    pub fn register(&mut self, cells: &[bool]) -> Result<u64, FiducialError> {
        let n = self.grid_width;
        if cells.len() != n * n {
            return Err(FiducialError::TemplateSizeMismatch {
                got: cells.len(),
                expected: n * n,
            });
        }
        // Entry `k` is the registered pattern as it appears when observed
        // `k` clockwise turns from canonical.
        let entry = [0usize, 1, 2, 3].map(|k| pack_cells(&rotate_cells(cells, n, k), n));
        let id = self.patterns.len() as u64;
        self.patterns.push(entry);
        Ok(id)
    }

    fn decode(&self, black_fractions: &[f64]) -> Option<GridDecoding> {
        let n = self.grid_width;
        debug_assert_eq!(black_fractions.len(), n * n);
        let cells: Vec<bool> = black_fractions.iter().map(|&f| f >= 0.5).collect();
        let observed = pack_cells(&cells, n);
        let total_bits = n * n;

        let mut best: Option<(GridDecoding, u32)> = None;
        for (id, rotations) in self.patterns.iter().enumerate() {
            for (rotation, reference) in rotations.iter().enumerate() {
                let distance = hamming(&observed, reference);
                if best.map(|(_, d)| distance < d).unwrap_or(true) {
                    best = Some((
                        GridDecoding {
                            id: id as u64,
                            rotation,
                        },
                        distance,
                    ));
                }
            }
        }
        let (decoding, distance) = best?;
        if distance as f64 > self.max_error_fraction * total_bits as f64 {
            debug!(
                "rejecting candidate: best template distance {} of {} bits",
                distance, total_bits
            );
            return None;
        }
        Some(decoding)
    }
}

fn pack_cells(cells: &[bool], n: usize) -> Vec<u64> {
    let mut words = vec![0u64; (n * n + 63) / 64];
    for (ix, &cell) in cells.iter().enumerate() {
        if cell {
            words[ix / 64] |= 1 << (ix % 64);
        }
    }
    words
}

fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_all_rotations() {
        for n in [3usize, 4, 6, 8] {
            let bits = n * n - 4;
            let id = if bits >= 16 { 0b1011_0010_1100_0101 } else { 0b101 };
            let cells = encode_grid_cells(id, n).unwrap();
            for rotation in 0..4 {
                // Observe the marker `rotation` clockwise turns from
                // canonical.
                let observed = rotate_cells(&cells, n, rotation);
                let decoded = decode_cells(&observed, n).unwrap();
                assert_eq!(decoded.id, id, "grid {} rotation {}", n, rotation);
                assert_eq!(decoded.rotation, rotation, "grid {}", n);
            }
        }
    }

    #[test]
    fn two_black_corners_reject() {
        let n = 4;
        let mut cells = encode_grid_cells(9, n).unwrap();
        cells[n - 1] = true;
        assert!(decode_cells(&cells, n).is_none());
    }

    #[test]
    fn ambiguous_cell_rejects_candidate() {
        let decoder = BinaryGridDecoder::new(4, 0.4).unwrap();
        let mut fractions = vec![0.0; 16];
        fractions[0] = 1.0;
        // Clear of the band on both sides decodes fine.
        assert!(decoder.decode(&fractions).is_some());
        // A fraction inside (0.3, 0.7) rejects the whole candidate.
        fractions[5] = 0.5;
        assert!(decoder.decode(&fractions).is_none());
        fractions[5] = 0.31;
        assert!(decoder.decode(&fractions).is_none());
        fractions[5] = 0.29;
        assert!(decoder.decode(&fractions).is_some());
    }

    #[test]
    fn id_must_fit_in_data_bits() {
        assert!(matches!(
            encode_grid_cells(1 << 5, 3),
            Err(FiducialError::IdOutOfRange { .. })
        ));
        assert!(encode_grid_cells((1 << 5) - 1, 3).is_ok());
    }

    #[test]
    fn grid_width_bounds_are_fatal() {
        assert!(matches!(
            BinaryGridDecoder::new(2, 0.4),
            Err(FiducialError::InvalidGridWidth(2))
        ));
        assert!(matches!(
            BinaryGridDecoder::new(9, 0.4),
            Err(FiducialError::InvalidGridWidth(9))
        ));
        assert!(matches!(
            BinaryGridDecoder::new(4, 0.0),
            Err(FiducialError::InvalidAmbiguityThreshold(_))
        ));
        assert!(matches!(
            BinaryGridDecoder::new(4, 1.0),
            Err(FiducialError::InvalidAmbiguityThreshold(_))
        ));
    }

    #[test]
    fn template_library_matches_all_rotations() {
        let mut library = TemplateLibrary::new(4, 0.0).unwrap();
        let first = encode_grid_cells(0b1010_1100_0011, 4).unwrap();
        let second = encode_grid_cells(0b0110_0101_1001, 4).unwrap();
        let first_id = library.register(&first).unwrap();
        let second_id = library.register(&second).unwrap();

        for rotation in 0..4 {
            let observed: Vec<f64> = rotate_cells(&second, 4, rotation)
                .iter()
                .map(|&b| if b { 1.0 } else { 0.0 })
                .collect();
            let decoded = library.decode(&observed).unwrap();
            assert_eq!(decoded.id, second_id);
            assert_eq!(decoded.rotation, rotation);
        }
        let observed: Vec<f64> = first.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect();
        assert_eq!(library.decode(&observed).unwrap().id, first_id);
    }

    #[test]
    fn unregistered_pattern_is_rejected() {
        let mut library = TemplateLibrary::new(4, 0.1).unwrap();
        library
            .register(&encode_grid_cells(0b1010_1100_0011, 4).unwrap())
            .unwrap();
        let noise: Vec<f64> = (0..16).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        assert!(library.decode(&noise).is_none());
    }
}
