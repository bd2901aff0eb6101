//! # Robust CV Core
//!
//! This library provides the common abstractions and types shared by the
//! robust estimation crates in this workspace: keypoints, correspondences,
//! projective points, bearings, and rigid poses. Every crate that produces or
//! consumes geometric models depends on this crate, so that estimators,
//! consensus engines, and refiners can all be composed freely.
//!
//! The estimation plug-in interface is the [`sample_consensus`] trait family:
//!
//! * [`sample_consensus::Estimator`] — generates zero or more candidate
//!   models from a minimal sample of correspondences.
//! * [`sample_consensus::Model`] — measures the distance of one
//!   correspondence to a candidate model.
//! * [`sample_consensus::Consensus`] — a robust fitting loop over the two
//!   traits above.
//!
//! The crate is `#![no_std]` and pulls in only dependencies that any
//! computer vision crate would already use.

#![no_std]

mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;
mod so3;

pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
pub use so3::*;
