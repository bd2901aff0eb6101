use crate::NormalizedKeyPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Rotation3, Vector3, SVD};
use num_traits::Float;
use rcv_core::{sample_consensus::Model, CameraToCamera, FeatureMatch, Pose};

/// This stores an essential matrix, which is satisfied by the following
/// constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates. You can
/// get a homogeneous normalized image coordinate by appending `1.0` to a
/// [`NormalizedKeyPoint`].
///
/// The essential matrix embodies the epipolar constraint between two
/// calibrated images: for any feature seen in the first image, the matching
/// feature in the second image must lie on the epipolar line that `E` maps
/// the first observation onto. Unlike the fundamental matrix, the essential
/// matrix can be decomposed into the relative rotation and (unscaled)
/// translation of the two cameras.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just
    /// means that the two non-zero singular values are averaged and the null
    /// singular value is forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        // Cannot fail because we asked for both U and V* on decomp.
        let mat = svd.recompose().unwrap();
        Some(Self(mat))
    }

    /// Returns two possible rotations for the essential matrix along with a
    /// translation bearing of arbitrary length and unknown sign.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition
    /// is considered complete, and `max_iterations` caps the SVD iterations
    /// for soft realtime systems.
    ///
    /// See [`EssentialMatrix::possible_unscaled_poses`] to get the actual
    /// candidate poses.
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        let Self(essential) = *self;

        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        // Perform SVD.
        let svd = SVD::try_new(essential, true, true, epsilon, max_iterations);
        // Extract only the U and V matrix from the SVD.
        let u_v_t = svd.map(|svd| {
            (
                svd.u.expect("Didn't get U and V matrix in SVD"),
                svd.v_t.expect("Didn't get U and V matrix in SVD"),
            )
        });
        // Force the determinants to be positive. This is done to ensure the
        // handedness of the rotation matrix is correct.
        let u_v_t = u_v_t.map(|(mut u, mut v_t)| {
            // Last column of U is undetermined since d = (a a 0).
            if u.determinant() < 0.0 {
                for n in u.column_mut(2).iter_mut() {
                    *n *= -1.0;
                }
            }
            // Last row of Vt is undetermined since d = (a a 0).
            if v_t.determinant() < 0.0 {
                for n in v_t.row_mut(2).iter_mut() {
                    *n *= -1.0;
                }
            }
            (u, v_t)
        });
        // Compute the possible rotations and the bearing with no normalization.
        u_v_t.map(|(u, v_t)| {
            (
                Rotation3::from_matrix_unchecked(u * w * v_t),
                Rotation3::from_matrix_unchecked(u * wt * v_t),
                u.column(2).into_owned(),
            )
        })
    }

    /// Returns the four candidate relative poses of the essential matrix.
    ///
    /// The translation has arbitrary scale. Exactly one of the four
    /// candidates places triangulated points in front of both cameras for
    /// real data; use cheirality pruning to select it.
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into a point `b`,
/// then the essential matrix returned by this method will give a residual of
/// approximately `0.0` when you call
/// `essential.residual(&FeatureMatch(a, b))`.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0.translation.vector.cross_matrix() * *pose.0.rotation.matrix())
    }
}

impl Model<FeatureMatch<NormalizedKeyPoint>> for EssentialMatrix {
    /// The absolute value of the algebraic epipolar residual
    /// `transpose(x') * E * x` over homogeneous normalized image coordinates.
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let Self(mat) = *self;
        let FeatureMatch(a, b) = data;
        let a = a.virtual_image_point().coords;
        let b = b.virtual_image_point().coords;

        Float::abs((b.transpose() * mat * a)[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{IsometryMatrix3, Point2};

    #[test]
    fn decomposition_contains_true_rotation_and_translation() {
        let pose = CameraToCamera(IsometryMatrix3::from_parts(
            Vector3::new(-0.8, 0.4, 0.5).into(),
            Rotation3::from_euler_angles(0.2, 0.3, 0.4),
        ));
        let (rot_a, rot_b, t) = EssentialMatrix::from(pose)
            .possible_rotations_unscaled_translation(1e-6, 50)
            .unwrap();
        let a_res = rot_a.rotation_to(&pose.0.rotation).angle();
        let b_res = rot_b.rotation_to(&pose.0.rotation).angle();
        assert!(a_res < 1e-4 || b_res < 1e-4);
        // The translation points in the same (or reverse) direction.
        let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
        assert!(t_res < 1e-4);
    }

    #[test]
    fn residual_of_projected_match_is_zero() {
        let pose = CameraToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.1, 0.2, -0.5).into(),
            Rotation3::from_euler_angles(0.05, -0.1, 0.08),
        ));
        let essential = EssentialMatrix::from(pose);
        let point_a = rcv_core::CameraPoint(nalgebra::Point3::new(0.4, -0.25, 5.0).to_homogeneous());
        let point_b = pose.transform(point_a);
        let a = NormalizedKeyPoint::from_camera_point(point_a).unwrap();
        let b = NormalizedKeyPoint::from_camera_point(point_b).unwrap();
        assert!(essential.residual(&FeatureMatch(a, b)) < 1e-9);
        // An unrelated observation does not satisfy the constraint.
        let outlier = NormalizedKeyPoint(Point2::new(0.9, -0.7));
        assert!(essential.residual(&FeatureMatch(a, outlier)) > 1e-3);
    }
}
