use crate::configured_lm;
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{storage::Owned, Dynamic, Matrix3, OMatrix, OVector, Vector, U9};
use rcv_core::{FeatureMatch, ImagePoint, KeyPoint};
use rcv_pinhole::FundamentalMatrix;

/// Default convergence tolerance for fundamental matrix refinement.
pub const FUNDAMENTAL_TOLERANCE: f64 = 1e-8;
/// Default iteration cap for fundamental matrix refinement.
pub const FUNDAMENTAL_MAX_ITERATIONS: usize = 400;

/// Minimizes the signed first-order (Sampson) epipolar distance over the
/// nine matrix entries.
#[derive(Clone)]
struct SampsonProblem<'a> {
    params: OVector<f64, U9>,
    matches: &'a [FeatureMatch<KeyPoint>],
}

impl<'a> SampsonProblem<'a> {
    fn matrix(&self) -> FundamentalMatrix {
        FundamentalMatrix(Matrix3::from_iterator(self.params.iter().copied()).transpose())
    }

    fn signed_sampson(&self, m: &FeatureMatch<KeyPoint>) -> f64 {
        let FundamentalMatrix(mat) = self.matrix();
        let FeatureMatch(a, b) = m;
        let a = a.image_point().to_homogeneous();
        let b = b.image_point().to_homogeneous();
        let e = (b.transpose() * mat * a)[0];
        let fa = mat * a;
        let ftb = mat.transpose() * b;
        let denominator = fa.x * fa.x + fa.y * fa.y + ftb.x * ftb.x + ftb.y * ftb.y;
        if denominator < f64::MIN_POSITIVE {
            return f64::INFINITY;
        }
        e / denominator.sqrt()
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, U9> for SampsonProblem<'a> {
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
        let residuals = OVector::<f64, Dynamic>::from_iterator(
            self.matches.len(),
            self.matches.iter().map(|m| self.signed_sampson(m)),
        );
        residuals.iter().all(|r| r.is_finite()).then(|| residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U9>> {
        numeric_jacobian_9(self, self.matches.len())
    }
}

/// Forward-difference Jacobian over nine parameters. The refined models are
/// small enough that the extra residual evaluations are irrelevant next to
/// an analytic derivation's complexity.
fn numeric_jacobian_9<P>(problem: &P, rows: usize) -> Option<OMatrix<f64, Dynamic, U9>>
where
    P: LeastSquaresProblem<f64, Dynamic, U9, ParameterStorage = Owned<f64, U9>, ResidualStorage = Owned<f64, Dynamic>>
        + Clone,
{
    let base = problem.residuals()?;
    let mut jacobian = OMatrix::<f64, Dynamic, U9>::zeros(rows);
    for j in 0..9 {
        let mut params = problem.params();
        let step = 1e-7 * (1.0 + params[j].abs());
        params[j] += step;
        let mut perturbed = problem.clone();
        perturbed.set_params(&params);
        let residuals = perturbed.residuals()?;
        jacobian.column_mut(j).copy_from(&((residuals - &base) / step));
    }
    Some(jacobian)
}

/// Refines a fundamental matrix over its inlier matches with the default
/// tolerance (`1e-8`) and iteration cap (`400`).
///
/// See [`refine_fundamental_with`].
pub fn refine_fundamental(
    initial: FundamentalMatrix,
    matches: &[FeatureMatch<KeyPoint>],
) -> Option<FundamentalMatrix> {
    refine_fundamental_with(
        initial,
        matches,
        FUNDAMENTAL_TOLERANCE,
        FUNDAMENTAL_MAX_ITERATIONS,
    )
}

/// Minimizes the total squared Sampson distance of `matches` starting from
/// `initial`, then re-enforces the rank-2 constraint.
///
/// Returns `None` when the optimization fails to converge or the system is
/// singular; the initial model is left untouched either way, so the caller
/// can fall back to it.
pub fn refine_fundamental_with(
    initial: FundamentalMatrix,
    matches: &[FeatureMatch<KeyPoint>],
    tolerance: f64,
    max_iterations: usize,
) -> Option<FundamentalMatrix> {
    if matches.is_empty() {
        return None;
    }
    let normalized = initial.normalize()?;
    let params = OVector::<f64, U9>::from_iterator(normalized.0.transpose().iter().copied());
    let problem = SampsonProblem { params, matches };
    let (problem, report) = configured_lm(tolerance, max_iterations).minimize(problem);
    if !report.termination.was_successful() {
        return None;
    }
    problem
        .matrix()
        .recondition(1e-12, 1000)
        .and_then(FundamentalMatrix::normalize)
}
