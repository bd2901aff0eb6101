//! This crate contains computational geometry algorithms shared by the
//! robust estimation crates.
//!
//! ## Triangulation
//!
//! In this problem we know the relative pose of two cameras and the bearing
//! of the same feature observed in each camera frame. We want to find the
//! point of intersection of the two rays.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! The rays will not intersect exactly for noisy data, so the midpoint of
//! the shortest segment connecting them is used. The midpoint method is the
//! cheapest triangulator and is accurate enough for its one purpose here:
//! determining on which side of each camera a feature lies (cheirality),
//! which prunes the physically impossible candidates that essential matrix
//! decomposition produces.

#![no_std]

pub mod epipolar;
pub mod triangulation;

pub use epipolar::select_pose_by_cheirality;
pub use triangulation::triangulate_relative_midpoint;
