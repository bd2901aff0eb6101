use crate::configured_lm;
use four_point::Homography;
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{storage::Owned, Dynamic, Matrix3, OMatrix, OVector, Point2, Vector, U9};
use rcv_core::{FeatureMatch, ImagePoint, KeyPoint};

/// Default convergence tolerance for homography refinement.
pub const HOMOGRAPHY_TOLERANCE: f64 = 1e-4;
/// Default iteration cap for homography refinement.
pub const HOMOGRAPHY_MAX_ITERATIONS: usize = 100;

/// Minimizes the symmetric transfer error components over the nine matrix
/// entries. Each match contributes four residuals: the forward mapping error
/// of the first point and the backward mapping error of the second.
#[derive(Clone)]
struct TransferProblem<'a> {
    params: OVector<f64, U9>,
    matches: &'a [FeatureMatch<KeyPoint>],
}

impl<'a> TransferProblem<'a> {
    fn matrix(&self) -> Homography {
        Homography(Matrix3::from_iterator(self.params.iter().copied()).transpose())
    }

    fn transfer_components(&self, m: &FeatureMatch<KeyPoint>) -> Option<[f64; 4]> {
        let h = self.matrix();
        let inverse = h.inverse()?;
        let FeatureMatch(a, b) = m;
        let a: Point2<f64> = a.image_point();
        let b: Point2<f64> = b.image_point();
        let forward = h.transform(a)?;
        let backward = inverse.transform(b)?;
        Some([
            forward.x - b.x,
            forward.y - b.y,
            backward.x - a.x,
            backward.y - a.y,
        ])
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, U9> for TransferProblem<'a> {
    type ResidualStorage = Owned<f64, Dynamic>;
    type JacobianStorage = Owned<f64, Dynamic, U9>;
    type ParameterStorage = Owned<f64, U9>;

    fn set_params(&mut self, x: &Vector<f64, U9, Self::ParameterStorage>) {
        self.params = *x;
    }

    fn params(&self) -> Vector<f64, U9, Self::ParameterStorage> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dynamic>> {
        let mut residuals = OVector::<f64, Dynamic>::zeros(4 * self.matches.len());
        for (i, m) in self.matches.iter().enumerate() {
            let components = self.transfer_components(m)?;
            for (j, &component) in components.iter().enumerate() {
                residuals[4 * i + j] = component;
            }
        }
        residuals.iter().all(|r| r.is_finite()).then(|| residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U9>> {
        let base = self.residuals()?;
        let mut jacobian = OMatrix::<f64, Dynamic, U9>::zeros(4 * self.matches.len());
        for j in 0..9 {
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

/// Refines a homography over its inlier matches with the default tolerance
/// (`1e-4`) and iteration cap (`100`).
///
/// See [`refine_homography_with`].
pub fn refine_homography(
    initial: Homography,
    matches: &[FeatureMatch<KeyPoint>],
) -> Option<Homography> {
    refine_homography_with(
        initial,
        matches,
        HOMOGRAPHY_TOLERANCE,
        HOMOGRAPHY_MAX_ITERATIONS,
    )
}

/// Minimizes the total squared symmetric transfer error of `matches`
/// starting from `initial`.
///
/// Returns `None` when the optimization fails to converge or the homography
/// becomes singular along the way; the caller falls back to the initial
/// model.
pub fn refine_homography_with(
    initial: Homography,
    matches: &[FeatureMatch<KeyPoint>],
    tolerance: f64,
    max_iterations: usize,
) -> Option<Homography> {
    if matches.is_empty() {
        return None;
    }
    let norm = initial.0.norm();
    if norm < f64::MIN_POSITIVE {
        return None;
    }
    let params = OVector::<f64, U9>::from_iterator((initial.0 / norm).transpose().iter().copied());
    let problem = TransferProblem { params, matches };
    let (problem, report) = configured_lm(tolerance, max_iterations).minimize(problem);
    if !report.termination.was_successful() {
        return None;
    }
    let refined = problem.matrix();
    let norm = refined.0.norm();
    (norm >= f64::MIN_POSITIVE).then(|| Homography(refined.0 / norm))
}
