//! Square fiducial detection and pose estimation.
//!
//! A square fiducial is a black-bordered square marker carrying an
//! identifying pattern, printed flat and observed by a calibrated camera.
//! This crate takes candidate quadrilaterals found by an external
//! polygon/contour detector and runs each through the pipeline:
//!
//! 1. estimate and refine the homography from a canonical square to the
//!    candidate,
//! 2. rectify the marker into a fixed-size square buffer through the
//!    (lens-redistorted) homography,
//! 3. validate that the border band is black,
//! 4. decode the interior pattern (binary grid or template library),
//! 5. estimate the 3d pose of the marker with [`QuadPoseEstimator`].
//!
//! Candidates that fail any stage are discarded silently (with a `log`
//! message at debug level); a frame with no markers simply produces an empty
//! result list. Only configuration mistakes surface as [`FiducialError`]s,
//! and those are raised at construction time.
//!
//! The [`QuadPoseEstimator`] is usable on its own whenever 4 corner
//! observations of a known planar square are available, independent of how
//! they were obtained.

mod decode;
mod detector;
mod pose;
mod quad;
mod rectify;

pub use decode::{
    encode_grid_cells, render_marker_image, BinaryGridDecoder, Decoder, GridDecoding,
    TemplateLibrary,
};
pub use detector::{CandidateQuad, DetectorConfig, SquareFiducialDetector};
pub use pose::QuadPoseEstimator;
pub use quad::Quadrilateral;
pub use rectify::rectify_square;

use rcv_core::WorldToCamera;

/// Configuration errors raised when a detector or decoder is constructed
/// with invalid parameters. Everything else in this crate fails soft: a bad
/// candidate is skipped, never an error.
#[derive(Debug, thiserror::Error)]
pub enum FiducialError {
    /// The binary grid width must lie in `[3, 8]`.
    #[error("binary grid width {0} is outside the supported range [3, 8]")]
    InvalidGridWidth(usize),

    /// The ambiguity threshold must lie strictly between 0 and 1.
    #[error("ambiguity threshold {0} must lie strictly between 0 and 1")]
    InvalidAmbiguityThreshold(f64),

    /// The border fraction must lie strictly between 0 and 0.5.
    #[error("border fraction {0} must lie strictly between 0 and 0.5")]
    InvalidBorderFraction(f64),

    /// The rectified square must be large enough to hold the border and grid.
    #[error("rectified square size {0} is too small")]
    InvalidSquareSize(u32),

    /// A template pattern's cell count does not match the library layout.
    #[error("template pattern has {got} cells but the library expects {expected}")]
    TemplateSizeMismatch {
        /// Cells in the offending pattern.
        got: usize,
        /// Cells the library layout requires.
        expected: usize,
    },

    /// An identifier does not fit in the data cells of the grid.
    #[error("id {id} does not fit into {bits} data bits")]
    IdOutOfRange {
        /// The offending identifier.
        id: u64,
        /// Data bits available in the grid.
        bits: usize,
    },
}

/// One accepted fiducial detection in a frame.
///
/// There is no identity across frames; a new list is produced per processed
/// image.
#[derive(Debug, Clone)]
pub struct FoundFiducial {
    /// The decoded identifier (grid value or template library index).
    pub id: u64,
    /// How many quarter turns were applied to canonicalize the pattern's
    /// orientation, in `0..4`.
    pub rotation: usize,
    /// The fiducial-to-camera transform.
    pub pose: WorldToCamera,
    /// The maximum squared corner reprojection error of the pose, in pixels.
    pub error: f64,
    /// The detected boundary in the original (distorted) image, corner order
    /// rotated to match the canonical pattern orientation.
    pub quad: Quadrilateral,
}
