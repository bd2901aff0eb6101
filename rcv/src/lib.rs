//! # `rcv`
//!
//! Batteries-included robust multi-view geometry and square-fiducial
//! estimation.
//!
//! This crate re-exports the whole suite in one place and adds the two
//! routines nearly every consumer wants anyway: a robust fundamental-matrix
//! fit and a robust PnP fit, each wiring a minimal estimator, the seeded
//! [RANSAC](consensus::Ransac) engine, and the non-linear refiner together.
//! For a production application, depend on the individual crates instead so
//! you only build what you use.
//!
//! All of the core types (matches, keypoints, poses) live in the crate root.
//! Modules group the pluggable machinery:
//!
//! * [`camera`] - camera models converting pixels to normalized coordinates
//! * [`consensus`] - robust model selection from noisy data
//! * [`estimate`] - minimal-sample model generators
//! * [`geom`] - triangulation and cheirality
//! * [`optimize`] - non-linear model refinement
//! * [`fiducial`] - the square fiducial detection pipeline

pub use rcv_core::*;
pub use rcv_pinhole::{EssentialMatrix, FundamentalMatrix, NormalizedKeyPoint};

/// Camera models to convert image coordinates into normalized image
/// coordinates (and back).
pub mod camera {
    pub use rcv_pinhole::{CameraIntrinsics, CameraIntrinsicsK1Distortion, NormalizedKeyPoint};
}

/// Finding the best estimated model from noisy data.
pub mod consensus {
    pub use ransac::Ransac;
}

/// Estimation of models from minimal samples of data.
pub mod estimate {
    pub use epnp::Epnp;
    pub use four_point::{FourPoint, Homography};
    pub use grunert::GrunertP3P;
    pub use seven_point::{EightPoint, SevenPoint};
}

/// Computational geometry algorithms used in multi-view vision.
pub mod geom {
    pub use rcv_geom::{select_pose_by_cheirality, triangulate_relative_midpoint};
}

/// Optimizing models to fit data.
pub mod optimize {
    pub use rcv_optimize::{
        refine_fundamental, refine_fundamental_with, refine_homography, refine_homography_with,
        refine_pose, refine_pose_with,
    };
}

/// Square fiducial detection and pose estimation.
pub mod fiducial {
    pub use rcv_fiducial::{
        encode_grid_cells, render_marker_image, BinaryGridDecoder, CandidateQuad, Decoder,
        DetectorConfig, FiducialError, FoundFiducial, GridDecoding, QuadPoseEstimator,
        Quadrilateral, SquareFiducialDetector, TemplateLibrary,
    };
}

use rand::{rngs::SmallRng, SeedableRng};
use rcv_core::sample_consensus::Consensus;

/// Estimates a fundamental matrix from the matches without outlier
/// rejection: the normalized eight-point algorithm over every match.
///
/// Use this when the matches are already known to be outlier-free, for
/// instance after a consensus pass.
pub fn simple_fundamental(matches: &[FeatureMatch<KeyPoint>]) -> Option<FundamentalMatrix> {
    if matches.len() < 8 {
        return None;
    }
    estimate::EightPoint::new().from_matches(matches.iter())
}

/// Robustly estimates a fundamental matrix from pixel matches containing
/// outliers.
///
/// Runs seeded RANSAC with the seven-point generator, then refines the
/// winning model over its inliers by Sampson-distance minimization (keeping
/// the unrefined model if refinement fails). `inlier_threshold` is the
/// Sampson distance in pixels under which a match counts as an inlier.
///
/// Returns the model and the inlier indices into `matches` (in input
/// order), or `None` when no model reaches a minimal sample's worth of
/// inliers. The result is a deterministic function of the inputs and the
/// seed.
pub fn robust_fundamental(
    matches: &[FeatureMatch<KeyPoint>],
    inlier_threshold: f64,
    seed: u64,
) -> Option<(FundamentalMatrix, Vec<usize>)> {
    let mut consensus = consensus::Ransac::new(inlier_threshold, SmallRng::seed_from_u64(seed));
    let (model, inliers) =
        consensus.model_inliers(&estimate::SevenPoint::new(), matches.iter().cloned())?;
    let inlier_matches: Vec<FeatureMatch<KeyPoint>> =
        inliers.iter().map(|&ix| matches[ix]).collect();
    let refined = optimize::refine_fundamental(model, &inlier_matches).unwrap_or(model);
    Some((refined, inliers))
}

/// Robustly estimates a world-to-camera pose from 3d-to-2d correspondences
/// containing outliers.
///
/// Runs seeded RANSAC with the Grunert P3P generator, then refines the
/// winning pose over its inliers by reprojection-error minimization
/// (keeping the unrefined pose if refinement fails). `inlier_threshold` is
/// the reprojection distance on the normalized image plane under which a
/// correspondence counts as an inlier.
pub fn robust_pose(
    landmarks: &[FeatureWorldMatch<NormalizedKeyPoint>],
    inlier_threshold: f64,
    seed: u64,
) -> Option<(WorldToCamera, Vec<usize>)> {
    let mut consensus = consensus::Ransac::new(inlier_threshold, SmallRng::seed_from_u64(seed));
    let (pose, inliers) =
        consensus.model_inliers(&estimate::GrunertP3P::new(), landmarks.iter().cloned())?;
    let inlier_landmarks: Vec<FeatureWorldMatch<NormalizedKeyPoint>> =
        inliers.iter().map(|&ix| landmarks[ix]).collect();
    let refined = optimize::refine_pose(pose, &inlier_landmarks).unwrap_or(pose);
    Some((refined, inliers))
}
