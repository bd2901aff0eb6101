//! Efficient PnP: pose estimation from four or more 3D-to-2D
//! correspondences, after Lepetit, Moreno-Noguer and Fua, "EPnP: An Accurate
//! O(n) Solution to the PnP Problem" (IJCV 2009).
//!
//! The world points are expressed as barycentric combinations of four
//! control points (three for planar scenes), the projection constraints
//! become a linear system in the camera-frame control point coordinates,
//! and the pose is recovered by absolute orientation between the world and
//! camera point sets.
//!
//! Unlike a minimal P3P solver this produces at most one pose, which makes
//! it a useful disambiguation fallback when the minimal solver's candidates
//! all fit poorly, at the cost of a small bias under noise. Planar point
//! sets, such as the corners of a square fiducial, are detected from the
//! rank of the world covariance and handled with the reduced control point
//! set.

use float_ord::FloatOrd;
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector2, Vector3};
use rcv_core::{
    sample_consensus::Estimator, Bearing, FeatureWorldMatch, Pose, Projective, WorldToCamera,
};

/// The EPnP estimator. Produces zero or one [`WorldToCamera`] pose from four
/// or more correspondences.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Epnp {
    /// Convergence epsilon of the eigendecompositions.
    pub epsilon: f64,
    /// Iteration cap of the eigendecompositions.
    pub iterations: usize,
    /// Relative eigenvalue bound below which the world point set is treated
    /// as planar.
    pub planar_epsilon: f64,
}

impl Epnp {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimate the pose from all provided correspondences (four or more).
    ///
    /// Returns `None` for degenerate configurations such as collinear or
    /// coincident world points.
    pub fn from_matches<'a, P, I>(&self, data: I) -> Option<WorldToCamera>
    where
        P: Bearing + 'a,
        I: Iterator<Item = &'a FeatureWorldMatch<P>> + Clone,
    {
        let mut world = Vec::new();
        let mut observations = Vec::new();
        for FeatureWorldMatch(image, point) in data {
            let bearing = image.bearing_unnormalized();
            if bearing.z.abs() < f64::MIN_POSITIVE {
                return None;
            }
            world.push(point.point()?.coords);
            observations.push(Vector2::new(bearing.x / bearing.z, bearing.y / bearing.z));
        }
        let n = world.len();
        assert!(n >= 4, "must provide at least 4 correspondences to Epnp");

        // Control points from the centroid and the principal axes of the
        // world point cloud.
        let centroid: Vector3<f64> = world.iter().sum::<Vector3<f64>>() / n as f64;
        let mut covariance = Matrix3::zeros();
        for p in &world {
            let d = p - centroid;
            covariance += d * d.transpose();
        }
        covariance /= n as f64;
        let eigen = covariance.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let mut order = [0usize, 1, 2];
        order.sort_unstable_by_key(|&ix| FloatOrd(-eigen.eigenvalues[ix]));
        let largest = eigen.eigenvalues[order[0]];
        if largest < f64::MIN_POSITIVE {
            // All world points coincide.
            return None;
        }
        if eigen.eigenvalues[order[1]] < self.planar_epsilon * largest {
            // Collinear world points cannot determine a pose.
            return None;
        }
        let planar = eigen.eigenvalues[order[2]] < self.planar_epsilon * largest;
        let ncp = if planar { 3 } else { 4 };

        let mut control_world = vec![centroid];
        for &ix in order.iter().take(ncp - 1) {
            let axis: Vector3<f64> = eigen.eigenvectors.column(ix).into_owned();
            control_world.push(centroid + axis * eigen.eigenvalues[ix].sqrt());
        }

        // Barycentric coordinates of every world point in the control basis.
        let alphas = self.barycentric(&world, &control_world)?;

        // Accumulate MᵀM of the 2n×3ncp projection system directly.
        let dim = 3 * ncp;
        let mut mtm = DMatrix::<f64>::zeros(dim, dim);
        let mut row_x = DVector::<f64>::zeros(dim);
        let mut row_y = DVector::<f64>::zeros(dim);
        for (alpha, obs) in alphas.iter().zip(&observations) {
            for j in 0..ncp {
                row_x[3 * j] = alpha[j];
                row_x[3 * j + 1] = 0.0;
                row_x[3 * j + 2] = -alpha[j] * obs.x;
                row_y[3 * j] = 0.0;
                row_y[3 * j + 1] = alpha[j];
                row_y[3 * j + 2] = -alpha[j] * obs.y;
            }
            mtm += &row_x * row_x.transpose();
            mtm += &row_y * row_y.transpose();
        }

        let eigen = mtm.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let smallest = (0..dim)
            .min_by_key(|&ix| FloatOrd(eigen.eigenvalues[ix]))
            .unwrap();
        let null_vector = eigen.eigenvectors.column(smallest);
        let mut control_camera: Vec<Vector3<f64>> = (0..ncp)
            .map(|j| Vector3::new(null_vector[3 * j], null_vector[3 * j + 1], null_vector[3 * j + 2]))
            .collect();

        // Recover the scale from the inter-control-point distances.
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 0..ncp {
            for j in (i + 1)..ncp {
                let dc = (control_camera[i] - control_camera[j]).norm();
                let dw = (control_world[i] - control_world[j]).norm();
                numerator += dc * dw;
                denominator += dc * dc;
            }
        }
        if denominator < f64::MIN_POSITIVE {
            return None;
        }
        let beta = numerator / denominator;
        for c in control_camera.iter_mut() {
            *c *= beta;
        }

        // The null vector's sign is arbitrary; flip so the scene sits in
        // front of the camera.
        let mean_depth: f64 = alphas
            .iter()
            .map(|alpha| {
                alpha
                    .iter()
                    .zip(&control_camera)
                    .map(|(&a, c)| a * c.z)
                    .sum::<f64>()
            })
            .sum::<f64>()
            / n as f64;
        if mean_depth < 0.0 {
            for c in control_camera.iter_mut() {
                *c = -*c;
            }
        }

        let camera: Vec<Vector3<f64>> = alphas
            .iter()
            .map(|alpha| {
                alpha
                    .iter()
                    .zip(&control_camera)
                    .map(|(&a, c)| c * a)
                    .sum()
            })
            .collect();

        self.absolute_orientation(&world, &camera)
    }

    /// Barycentric coordinates of each point in the control point basis.
    /// The first coordinate is implied by the rest summing to one.
    fn barycentric(
        &self,
        world: &[Vector3<f64>],
        control: &[Vector3<f64>],
    ) -> Option<Vec<Vec<f64>>> {
        let ncp = control.len();
        let mut alphas = Vec::with_capacity(world.len());
        if ncp == 4 {
            let basis = Matrix3::from_columns(&[
                control[1] - control[0],
                control[2] - control[0],
                control[3] - control[0],
            ]);
            let inverse = basis.try_inverse()?;
            for p in world {
                let rest = inverse * (p - control[0]);
                alphas.push(vec![1.0 - rest.sum(), rest.x, rest.y, rest.z]);
            }
        } else {
            let b0 = control[1] - control[0];
            let b1 = control[2] - control[0];
            let gram = nalgebra::Matrix2::new(b0.dot(&b0), b0.dot(&b1), b0.dot(&b1), b1.dot(&b1));
            let inverse = gram.try_inverse()?;
            for p in world {
                let d = p - control[0];
                let rest = inverse * Vector2::new(b0.dot(&d), b1.dot(&d));
                alphas.push(vec![1.0 - rest.x - rest.y, rest.x, rest.y]);
            }
        }
        Some(alphas)
    }

    /// Rigid transform taking the world point set onto the camera point set
    /// (Kabsch/Horn absolute orientation).
    fn absolute_orientation(
        &self,
        world: &[Vector3<f64>],
        camera: &[Vector3<f64>],
    ) -> Option<WorldToCamera> {
        let n = world.len() as f64;
        let world_mean: Vector3<f64> = world.iter().sum::<Vector3<f64>>() / n;
        let camera_mean: Vector3<f64> = camera.iter().sum::<Vector3<f64>>() / n;
        let mut h = Matrix3::zeros();
        for (w, c) in world.iter().zip(camera) {
            h += (w - world_mean) * (c - camera_mean).transpose();
        }
        let svd = h.try_svd(true, true, self.epsilon, self.iterations)?;
        let u = svd.u?;
        let v = svd.v_t?.transpose();
        let mut rotation = v * u.transpose();
        if rotation.determinant() < 0.0 {
            let mut v = v;
            for entry in v.column_mut(2).iter_mut() {
                *entry = -*entry;
            }
            rotation = v * u.transpose();
        }
        let rotation = Rotation3::from_matrix_eps(&rotation, 1e-12, 100, Rotation3::identity());
        let translation = camera_mean - rotation * world_mean;
        if !translation.iter().all(|x| x.is_finite()) {
            return None;
        }
        Some(WorldToCamera::from_parts(translation, rotation))
    }
}

impl Default for Epnp {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
            planar_epsilon: 1e-9,
        }
    }
}

impl<P> Estimator<FeatureWorldMatch<P>> for Epnp
where
    P: Bearing + Clone,
{
    type Model = WorldToCamera;
    type ModelIter = Option<WorldToCamera>;
    const MIN_SAMPLES: usize = 4;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureWorldMatch<P>> + Clone,
    {
        let samples: Vec<FeatureWorldMatch<P>> = data.collect();
        assert!(
            samples.len() >= 4,
            "must provide at least 4 samples to Epnp::estimate"
        );
        self.from_matches(samples.iter())
    }
}
