use crate::{CameraIntrinsics, EssentialMatrix};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Vector3};
use num_traits::Float;
use rcv_core::{sample_consensus::Model, FeatureMatch, ImagePoint, KeyPoint};

/// This stores a fundamental matrix, which is satisfied by the following
/// constraint over raw pixel coordinates:
///
/// transpose(x') * F * x = 0
///
/// Where `x'` and `x` are homogeneous pixel coordinates of the same feature
/// observed in the second and first image respectively. The fundamental
/// matrix is the uncalibrated counterpart of the [`EssentialMatrix`]: it
/// encodes the epipolar constraint without knowledge of either camera's
/// intrinsic matrix.
///
/// The matrix is only defined up to scale. All operations on this type are
/// scale-invariant, and [`FundamentalMatrix::normalize`] can be used to bring
/// the matrix into a canonical scale when comparing instances.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct FundamentalMatrix(pub Matrix3<f64>);

impl FundamentalMatrix {
    /// The algebraic epipolar residual `transpose(x') * F * x`.
    ///
    /// This is signed and scale-dependent. Prefer
    /// [`FundamentalMatrix::sampson_distance`] when a geometrically
    /// meaningful quantity is needed.
    pub fn epipolar_residual(&self, m: &FeatureMatch<KeyPoint>) -> f64 {
        let Self(mat) = *self;
        let FeatureMatch(a, b) = m;
        let a = a.image_point().to_homogeneous();
        let b = b.image_point().to_homogeneous();
        (b.transpose() * mat * a)[0]
    }

    /// The squared Sampson distance of the match to the epipolar constraint.
    ///
    /// This is the first-order approximation of the squared geometric
    /// distance of the correspondence to the variety `x'ᵀ F x = 0`, in
    /// squared pixels. It is invariant to the scale of the matrix.
    pub fn sampson_distance(&self, m: &FeatureMatch<KeyPoint>) -> f64 {
        let Self(mat) = *self;
        let FeatureMatch(a, b) = m;
        let a = a.image_point().to_homogeneous();
        let b = b.image_point().to_homogeneous();
        let e = (b.transpose() * mat * a)[0];
        let fa: Vector3<f64> = mat * a;
        let ftb: Vector3<f64> = mat.transpose() * b;
        let denominator = fa.x * fa.x + fa.y * fa.y + ftb.x * ftb.x + ftb.y * ftb.y;
        if denominator < f64::MIN_POSITIVE {
            return f64::INFINITY;
        }
        e * e / denominator
    }

    /// Scale the matrix so its Frobenius norm is `1.0`.
    ///
    /// Returns `None` if the matrix is zero.
    #[must_use]
    pub fn normalize(self) -> Option<Self> {
        let norm = self.0.norm();
        if norm < f64::MIN_POSITIVE {
            return None;
        }
        Some(Self(self.0 / norm))
    }

    /// Enforce the rank-2 constraint of a fundamental matrix by zeroing the
    /// smallest singular value.
    ///
    /// Linear estimation and non-linear refinement both produce matrices that
    /// only approximately satisfy the constraint; this finds the closest
    /// rank-2 matrix in the Frobenius sense.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        // Cannot fail because we asked for both U and V* on decomp.
        let mat = svd.recompose().unwrap();
        Some(Self(mat))
    }

    /// Compute the essential matrix from this fundamental matrix and the
    /// intrinsics of the two cameras: `E = K'ᵀ F K`.
    ///
    /// `a` is the camera of the first point in each match and `b` the camera
    /// of the second.
    pub fn essential(&self, a: &CameraIntrinsics, b: &CameraIntrinsics) -> EssentialMatrix {
        EssentialMatrix(b.matrix().transpose() * self.0 * a.matrix())
    }

    /// Creates the fundamental matrix corresponding to the relative pose and
    /// camera intrinsics: `F = K'⁻ᵀ E K⁻¹`.
    ///
    /// Returns `None` if either intrinsic matrix is not invertible.
    pub fn from_pose(
        essential: EssentialMatrix,
        a: &CameraIntrinsics,
        b: &CameraIntrinsics,
    ) -> Option<Self> {
        let ka_inv = a.matrix().try_inverse()?;
        let kb_inv = b.matrix().try_inverse()?;
        Some(Self(kb_inv.transpose() * essential.0 * ka_inv))
    }
}

impl Model<FeatureMatch<KeyPoint>> for FundamentalMatrix {
    /// The first-order geometric (Sampson) distance of the match to the
    /// epipolar constraint, in pixels.
    fn residual(&self, data: &FeatureMatch<KeyPoint>) -> f64 {
        Float::sqrt(self.sampson_distance(data))
    }
}
