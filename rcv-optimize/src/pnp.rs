use crate::configured_lm;
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{storage::Owned, Dynamic, OMatrix, OVector, Vector, Vector6, U6};
use rcv_core::{Bearing, FeatureWorldMatch, Pose, Projective, WorldToCamera};

/// Default convergence tolerance for pose refinement.
pub const PNP_TOLERANCE: f64 = 1e-8;
/// Default iteration cap for pose refinement.
pub const PNP_MAX_ITERATIONS: usize = 200;

/// Residual assigned to a point that falls behind the camera during
/// optimization. Finite so the optimizer can recover, but large enough that
/// no acceptable pose keeps a point there.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;

/// Minimizes reprojection error on the normalized image plane over the six
/// se(3) parameters of the pose.
#[derive(Clone)]
struct ReprojectionProblem<'a, P> {
    params: Vector6<f64>,
    landmarks: &'a [FeatureWorldMatch<P>],
}

impl<'a, P> ReprojectionProblem<'a, P>
where
    P: Bearing,
{
    fn pose(&self) -> WorldToCamera {
        WorldToCamera::from_se3(self.params)
    }

    fn reprojection_components(&self, landmark: &FeatureWorldMatch<P>) -> [f64; 2] {
        let FeatureWorldMatch(observation, world) = landmark;
        let prediction = self.pose().transform(*world).bearing_unnormalized();
        if prediction.z <= 0.0 {
            return [BEHIND_CAMERA_RESIDUAL; 2];
        }
        let observation = observation.bearing_unnormalized();
        if observation.z <= 0.0 {
            return [BEHIND_CAMERA_RESIDUAL; 2];
        }
        let delta = prediction.xy() / prediction.z - observation.xy() / observation.z;
        [delta.x, delta.y]
    }
}

impl<'a, P> LeastSquaresProblem<f64, Dynamic, U6> for ReprojectionProblem<'a, P>
where
    P: Bearing + Clone,
{
    type ResidualStorage = Owned<f64, Dynamic>;
    type JacobianStorage = Owned<f64, Dynamic, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &Vector<f64, U6, Self::ParameterStorage>) {
        self.params = *x;
    }

    fn params(&self) -> Vector<f64, U6, Self::ParameterStorage> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dynamic>> {
        let mut residuals = OVector::<f64, Dynamic>::zeros(2 * self.landmarks.len());
        for (i, landmark) in self.landmarks.iter().enumerate() {
            let [dx, dy] = self.reprojection_components(landmark);
            residuals[2 * i] = dx;
            residuals[2 * i + 1] = dy;
        }
        residuals.iter().all(|r| r.is_finite()).then(|| residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U6>> {
        let base = self.residuals()?;
        let mut jacobian = OMatrix::<f64, Dynamic, U6>::zeros(2 * self.landmarks.len());
        for j in 0..6 {
            let mut params = self.params;
            let step = 1e-7 * (1.0 + params[j].abs());
            params[j] += step;
            let mut perturbed = self.clone();
            perturbed.set_params(&params);
            let residuals = perturbed.residuals()?;
            jacobian.column_mut(j).copy_from(&((residuals - &base) / step));
        }
        Some(jacobian)
    }
}

/// Refines a pose over its landmarks with the default tolerance (`1e-8`)
/// and iteration cap (`200`).
///
/// See [`refine_pose_with`].
pub fn refine_pose<P>(
    initial: WorldToCamera,
    landmarks: &[FeatureWorldMatch<P>],
) -> Option<WorldToCamera>
where
    P: Bearing + Clone,
{
    refine_pose_with(initial, landmarks, PNP_TOLERANCE, PNP_MAX_ITERATIONS)
}

/// Minimizes the total squared reprojection error of `landmarks` on the
/// normalized image plane, starting from `initial` and optimizing the six
/// se(3) degrees of freedom.
///
/// Returns `None` when the optimization fails to converge; the caller falls
/// back to the initial pose (a convergence failure here is not fatal
/// anywhere in the pipeline).
pub fn refine_pose_with<P>(
    initial: WorldToCamera,
    landmarks: &[FeatureWorldMatch<P>],
    tolerance: f64,
    max_iterations: usize,
) -> Option<WorldToCamera>
where
    P: Bearing + Clone,
{
    if landmarks.is_empty() {
        return None;
    }
    let problem = ReprojectionProblem {
        params: initial.se3(),
        landmarks,
    };
    let (problem, report) = configured_lm(tolerance, max_iterations).minimize(problem);
    if !report.termination.was_successful() {
        return None;
    }
    let refined = problem.pose();
    refined
        .isometry()
        .translation
        .vector
        .iter()
        .all(|x| x.is_finite())
        .then(|| refined)
}
