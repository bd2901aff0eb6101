//! Minimal-sample estimation of the fundamental matrix by the
//! [seven-point and eight-point algorithms](https://en.wikipedia.org/wiki/Eight-point_algorithm)
//! of Richard Hartley and Andrew Zisserman.
//!
//! Both estimators operate on raw pixel correspondences and internally apply
//! Hartley's isotropic normalization, which is what makes the linear system
//! numerically usable at image scales of hundreds of pixels.
//!
//! * [`EightPoint`] produces a single least-squares solution from eight or
//!   more matches.
//! * [`SevenPoint`] exploits the rank-2 constraint to solve from exactly
//!   seven matches, producing up to three candidate matrices (the real roots
//!   of a cubic). It is the preferred generator inside a consensus loop since
//!   the smaller sample size needs fewer iterations to find an outlier-free
//!   subset.
//!
//! To clean up the rank of an estimated matrix, see
//! [`rcv_pinhole::FundamentalMatrix::recondition`].

#![no_std]

use arrayvec::ArrayVec;
use nalgebra::{Matrix3, OMatrix, OVector, U9};
use num_traits::Float;
use rcv_core::{sample_consensus::Estimator, FeatureMatch, ImagePoint, KeyPoint};
use rcv_pinhole::FundamentalMatrix;

/// Isotropic normalization transform of a set of image points: the centroid
/// is moved to the origin and the mean distance from it becomes `sqrt(2)`.
fn hartley_transform<'a>(points: impl Iterator<Item = &'a KeyPoint> + Clone) -> Matrix3<f64> {
    let mut count = 0usize;
    let mut centroid = nalgebra::Vector2::zeros();
    for p in points.clone() {
        centroid += p.image_point().coords;
        count += 1;
    }
    let centroid = centroid / count as f64;
    let mean_distance = points
        .map(|p| (p.image_point().coords - centroid).norm())
        .sum::<f64>()
        / count as f64;
    let scale = if mean_distance < f64::MIN_POSITIVE {
        1.0
    } else {
        Float::sqrt(2.0) / mean_distance
    };
    Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    )
}

/// One row of the epipolar design matrix for the constraint `bᵀ F a = 0`,
/// with the matrix flattened row-major.
fn epipolar_row(ta: &Matrix3<f64>, tb: &Matrix3<f64>, m: &FeatureMatch<KeyPoint>) -> OVector<f64, U9> {
    let FeatureMatch(a, b) = m;
    let a = ta * a.image_point().to_homogeneous();
    let b = tb * b.image_point().to_homogeneous();
    OVector::<f64, U9>::from_row_slice(&[
        b.x * a.x,
        b.x * a.y,
        b.x,
        b.y * a.x,
        b.y * a.y,
        b.y,
        a.x,
        a.y,
        1.0,
    ])
}

/// Reverses the normalization: `F = Tbᵀ Fn Ta`, scaled to unit norm.
fn denormalize(ta: &Matrix3<f64>, tb: &Matrix3<f64>, fn_mat: Matrix3<f64>) -> Option<FundamentalMatrix> {
    FundamentalMatrix(tb.transpose() * fn_mat * ta).normalize()
}

/// Extracts the eigenvector of the `index`-th smallest eigenvalue of `ata`.
fn small_eigenvector(
    ata: &OMatrix<f64, U9, U9>,
    epsilon: f64,
    iterations: usize,
    index: usize,
) -> Option<Matrix3<f64>> {
    let eigens = ata.try_symmetric_eigen(epsilon, iterations)?;
    let mut order: [usize; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    order.sort_unstable_by_key(|&ix| float_ord::FloatOrd(eigens.eigenvalues[ix]));
    let column = eigens.eigenvectors.column(order[index]);
    Some(Matrix3::from_iterator(column.iter().copied()).transpose())
}

/// Real roots of `c3 x³ + c2 x² + c1 x + c0 = 0`, Newton-polished.
fn solve_cubic(c3: f64, c2: f64, c1: f64, c0: f64) -> ArrayVec<f64, 3> {
    let mut roots = ArrayVec::new();
    let scale = Float::max(
        Float::max(Float::abs(c3), Float::abs(c2)),
        Float::max(Float::abs(c1), Float::abs(c0)),
    );
    if scale < f64::MIN_POSITIVE {
        return roots;
    }
    if Float::abs(c3) < 1e-12 * scale {
        // Degenerates to a quadratic.
        if Float::abs(c2) < 1e-12 * scale {
            if Float::abs(c1) >= 1e-12 * scale {
                roots.push(-c0 / c1);
            }
            return roots;
        }
        let discriminant = c1 * c1 - 4.0 * c2 * c0;
        if discriminant >= 0.0 {
            let sq = Float::sqrt(discriminant);
            roots.push((-c1 + sq) / (2.0 * c2));
            roots.push((-c1 - sq) / (2.0 * c2));
        }
        return roots;
    }

    // Monic form x³ + b x² + c x + d, then the depressed cubic t³ + p t + q
    // with x = t - b/3.
    let b = c2 / c3;
    let c = c1 / c3;
    let d = c0 / c3;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let discriminant = q * q / 4.0 + p * p * p / 27.0;
    if discriminant > 0.0 {
        // One real root via Cardano.
        let sq = Float::sqrt(discriminant);
        let u = Float::cbrt(-q / 2.0 + sq);
        let v = Float::cbrt(-q / 2.0 - sq);
        roots.push(u + v + shift);
    } else if Float::abs(p) < f64::MIN_POSITIVE {
        // Triple root.
        roots.push(shift);
    } else {
        // Three real roots via the trigonometric method.
        let m = 2.0 * Float::sqrt(-p / 3.0);
        let theta = Float::acos(Float::max(-1.0, Float::min(1.0, 3.0 * q / (p * m)))) / 3.0;
        for k in 0..3 {
            let t = m * Float::cos(theta - 2.0 * core::f64::consts::PI * k as f64 / 3.0);
            roots.push(t + shift);
        }
    }

    // Newton polish on the original polynomial.
    for root in roots.iter_mut() {
        for _ in 0..5 {
            let fx = ((c3 * *root + c2) * *root + c1) * *root + c0;
            let fpx = (3.0 * c3 * *root + 2.0 * c2) * *root + c1;
            if Float::abs(fpx) < f64::MIN_POSITIVE {
                break;
            }
            *root -= fx / fpx;
        }
    }
    roots
}

/// Performs the normalized eight-point algorithm, producing the single
/// least-squares fundamental matrix for the sample.
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimate the fundamental matrix from all provided matches (eight or
    /// more). Returns `None` for degenerate configurations.
    pub fn from_matches<'a, I>(&self, data: I) -> Option<FundamentalMatrix>
    where
        I: Iterator<Item = &'a FeatureMatch<KeyPoint>> + Clone,
    {
        let ta = hartley_transform(data.clone().map(|FeatureMatch(a, _)| a));
        let tb = hartley_transform(data.clone().map(|FeatureMatch(_, b)| b));
        let mut ata: OMatrix<f64, U9, U9> = nalgebra::zero();
        let mut count = 0usize;
        for m in data {
            let row = epipolar_row(&ta, &tb, m);
            ata += row * row.transpose();
            count += 1;
        }
        assert!(
            count >= 8,
            "must provide at least 8 matches to EightPoint"
        );
        let fn_mat = small_eigenvector(&ata, self.epsilon, self.iterations, 0)?;
        let rank2 = FundamentalMatrix(fn_mat).recondition(self.epsilon, self.iterations)?;
        denormalize(&ta, &tb, rank2.0)
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<KeyPoint>> for EightPoint {
    type Model = FundamentalMatrix;
    type ModelIter = Option<FundamentalMatrix>;
    const MIN_SAMPLES: usize = 8;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    {
        let samples: ArrayVec<FeatureMatch<KeyPoint>, 8> = data.take(8).collect();
        assert!(
            samples.len() == 8,
            "must provide 8 matches to EightPoint::estimate"
        );
        self.from_matches(samples.iter())
    }
}

/// Performs the seven-point algorithm.
///
/// The epipolar design matrix of seven matches has a two-dimensional null
/// space spanned by `F1` and `F2`; imposing `det(λ F1 + (1-λ) F2) = 0`
/// yields a cubic in `λ` with up to three real roots, each of which is a
/// candidate fundamental matrix. All candidates satisfy the epipolar
/// constraint of the sample exactly; consensus scoring against the remaining
/// matches must pick among them.
#[derive(Copy, Clone, Debug)]
pub struct SevenPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl SevenPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimate up to three candidate fundamental matrices from exactly
    /// seven matches. Degenerate samples produce an empty set.
    pub fn from_matches<'a, I>(&self, data: I) -> ArrayVec<FundamentalMatrix, 3>
    where
        I: Iterator<Item = &'a FeatureMatch<KeyPoint>> + Clone,
    {
        let ta = hartley_transform(data.clone().map(|FeatureMatch(a, _)| a));
        let tb = hartley_transform(data.clone().map(|FeatureMatch(_, b)| b));
        let mut ata: OMatrix<f64, U9, U9> = nalgebra::zero();
        let mut count = 0usize;
        for m in data {
            let row = epipolar_row(&ta, &tb, m);
            ata += row * row.transpose();
            count += 1;
        }
        assert!(count >= 7, "must provide at least 7 matches to SevenPoint");

        let mut candidates = ArrayVec::new();
        let f1 = match small_eigenvector(&ata, self.epsilon, self.iterations, 0) {
            Some(mat) => mat,
            None => return candidates,
        };
        let f2 = match small_eigenvector(&ata, self.epsilon, self.iterations, 1) {
            Some(mat) => mat,
            None => return candidates,
        };

        // det(λ F1 + (1-λ) F2) is a cubic in λ. Its coefficients are
        // recovered by evaluating the determinant at four values of λ.
        let det_at = |lambda: f64| (f1 * lambda + f2 * (1.0 - lambda)).determinant();
        let d0 = det_at(0.0);
        let d1 = det_at(1.0);
        let dm1 = det_at(-1.0);
        let d2 = det_at(2.0);
        let c0 = d0;
        let c2 = (d1 + dm1) / 2.0 - c0;
        let odd = (d1 - dm1) / 2.0; // c1 + c3
        let c3 = ((d2 - c0 - 4.0 * c2) / 2.0 - odd) / 3.0;
        let c1 = odd - c3;

        for lambda in solve_cubic(c3, c2, c1, c0) {
            let fn_mat = f1 * lambda + f2 * (1.0 - lambda);
            if let Some(f) = denormalize(&ta, &tb, fn_mat) {
                candidates.push(f);
            }
        }
        candidates
    }
}

impl Default for SevenPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<KeyPoint>> for SevenPoint {
    type Model = FundamentalMatrix;
    type ModelIter = ArrayVec<FundamentalMatrix, 3>;
    const MIN_SAMPLES: usize = 7;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    {
        let samples: ArrayVec<FeatureMatch<KeyPoint>, 7> = data.take(7).collect();
        assert!(
            samples.len() == 7,
            "must provide 7 matches to SevenPoint::estimate"
        );
        self.from_matches(samples.iter())
    }
}
