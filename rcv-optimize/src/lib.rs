//! Non-linear least-squares refinement of geometric models.
//!
//! The linear minimal-sample estimators minimize algebraic error, which is
//! not what anyone actually cares about. Given an initial model and the
//! inlier set found by consensus, the refiners in this crate minimize a
//! geometric error with Levenberg-Marquardt:
//!
//! * [`refine_fundamental`] — the Sampson distance of each match to the
//!   epipolar constraint.
//! * [`refine_homography`] — the symmetric transfer error of each match.
//! * [`refine_pose`] — the reprojection error of each world point on the
//!   normalized image plane, over the six se(3) degrees of freedom.
//!
//! All refiners follow the same contract: the input model and match set are
//! never mutated, a failure to converge (or a singular Jacobian) yields
//! `None`, and callers fall back to the unrefined model in that case. The
//! `_with` variants take an explicit convergence tolerance and iteration
//! cap.

mod fundamental;
mod homography;
mod pnp;

pub use fundamental::{refine_fundamental, refine_fundamental_with};
pub use homography::{refine_homography, refine_homography_with};
pub use pnp::{refine_pose, refine_pose_with};

use levenberg_marquardt::LevenbergMarquardt;

fn configured_lm(tolerance: f64, max_iterations: usize) -> LevenbergMarquardt<f64> {
    LevenbergMarquardt::new()
        .with_ftol(tolerance)
        .with_xtol(tolerance)
        .with_patience(max_iterations)
}
