//! Planar homography estimation by the direct linear transform.
//!
//! A homography is the projective 3×3 transform relating two images of the
//! same plane. Four point correspondences determine it exactly (the minimal
//! sample); more points give a least-squares solution. The estimator applies
//! Hartley's isotropic normalization before building the linear system.
//!
//! Degenerate samples, such as three collinear points, do not determine a
//! homography; the estimator detects the rank deficiency and produces no
//! candidate, which a consensus loop treats as a skipped iteration.

#![no_std]

use arrayvec::ArrayVec;
use nalgebra::{Matrix3, OMatrix, OVector, Point2, U9};
use num_traits::Float;
use rcv_core::{sample_consensus::Estimator, sample_consensus::Model, FeatureMatch, ImagePoint, KeyPoint};

use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};

/// A planar projective transform between two images, stored row-major as the
/// matrix `H` in `x' ~ H x` over homogeneous pixel coordinates.
///
/// Only defined up to scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// Applies the homography to a point.
    ///
    /// Returns `None` if the point maps to the line at infinity.
    pub fn transform(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        let mapped = self.0 * point.to_homogeneous();
        Point2::from_homogeneous(mapped)
    }

    /// The inverse transform, if the matrix is invertible.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// The symmetric transfer error of a match: the forward mapping error of
    /// the first point plus the backward mapping error of the second, in
    /// pixels.
    pub fn symmetric_transfer_error(&self, m: &FeatureMatch<KeyPoint>) -> f64 {
        let FeatureMatch(a, b) = m;
        let a = a.image_point();
        let b = b.image_point();
        let forward = match self.transform(a) {
            Some(mapped) => (mapped - b).norm(),
            None => return f64::INFINITY,
        };
        let backward = match self.inverse().and_then(|inv| inv.transform(b)) {
            Some(mapped) => (mapped - a).norm(),
            None => return f64::INFINITY,
        };
        forward + backward
    }
}

impl Model<FeatureMatch<KeyPoint>> for Homography {
    fn residual(&self, data: &FeatureMatch<KeyPoint>) -> f64 {
        self.symmetric_transfer_error(data)
    }
}

fn hartley_transform(points: impl Iterator<Item = Point2<f64>> + Clone) -> Matrix3<f64> {
    let mut count = 0usize;
    let mut centroid = nalgebra::Vector2::zeros();
    for p in points.clone() {
        centroid += p.coords;
        count += 1;
    }
    let centroid = centroid / count as f64;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / count as f64;
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

/// Estimates a [`Homography`] from four or more point correspondences by the
/// direct linear transform.
#[derive(Copy, Clone, Debug)]
pub struct FourPoint {
    pub epsilon: f64,
    pub iterations: usize,
    /// Relative eigenvalue bound under which the linear system is considered
    /// rank deficient (degenerate sample).
    pub degeneracy_epsilon: f64,
}

impl FourPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimate the homography mapping the first point of each match onto the
    /// second. Returns `None` for degenerate samples.
    pub fn from_matches<'a, I>(&self, data: I) -> Option<Homography>
    where
        I: Iterator<Item = &'a FeatureMatch<KeyPoint>> + Clone,
    {
        let ta = hartley_transform(data.clone().map(|FeatureMatch(a, _)| a.image_point()));
        let tb = hartley_transform(data.clone().map(|FeatureMatch(_, b)| b.image_point()));

        let mut ata: OMatrix<f64, U9, U9> = nalgebra::zero();
        let mut count = 0usize;
        for FeatureMatch(a, b) in data {
            let a = ta * a.image_point().to_homogeneous();
            let b = tb * b.image_point().to_homogeneous();
            // Two rows of the DLT system per correspondence.
            let row_x = OVector::<f64, U9>::from_row_slice(&[
                -a.x,
                -a.y,
                -1.0,
                0.0,
                0.0,
                0.0,
                b.x * a.x,
                b.x * a.y,
                b.x,
            ]);
            let row_y = OVector::<f64, U9>::from_row_slice(&[
                0.0,
                0.0,
                0.0,
                -a.x,
                -a.y,
                -1.0,
                b.y * a.x,
                b.y * a.y,
                b.y,
            ]);
            ata += row_x * row_x.transpose() + row_y * row_y.transpose();
            count += 1;
        }
        assert!(count >= 4, "must provide at least 4 matches to FourPoint");

        let eigens = ata.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let mut order: [usize; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];
        order.sort_unstable_by_key(|&ix| float_ord::FloatOrd(eigens.eigenvalues[ix]));
        // A unique solution requires a one-dimensional null space. A second
        // near-zero eigenvalue means the sample was degenerate.
        let largest = eigens.eigenvalues[order[8]];
        if largest < f64::MIN_POSITIVE
            || eigens.eigenvalues[order[1]] < self.degeneracy_epsilon * largest
        {
            return None;
        }
        let h = eigens.eigenvectors.column(order[0]);
        let hn = Matrix3::from_iterator(h.iter().copied()).transpose();
        let denormalized = tb.try_inverse()? * hn * ta;
        let norm = denormalized.norm();
        if norm < f64::MIN_POSITIVE {
            return None;
        }
        Some(Homography(denormalized / norm))
    }
}

impl Default for FourPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
            degeneracy_epsilon: 1e-9,
        }
    }
}

impl Estimator<FeatureMatch<KeyPoint>> for FourPoint {
    type Model = Homography;
    type ModelIter = Option<Homography>;
    const MIN_SAMPLES: usize = 4;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    {
        let samples: ArrayVec<FeatureMatch<KeyPoint>, 4> = data.take(4).collect();
        assert!(
            samples.len() == 4,
            "must provide 4 matches to FourPoint::estimate"
        );
        self.from_matches(samples.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_through(
        h: &Matrix3<f64>,
        sources: &[Point2<f64>],
    ) -> ArrayVec<FeatureMatch<KeyPoint>, 8> {
        sources
            .iter()
            .map(|&a| {
                let b = Point2::from_homogeneous(h * a.to_homogeneous()).unwrap();
                FeatureMatch(KeyPoint(a), KeyPoint(b))
            })
            .collect()
    }

    #[test]
    fn recovers_exact_homography() {
        #[rustfmt::skip]
        let truth = Matrix3::new(
            1.2,  0.1,  30.0,
            -0.05, 0.9, -12.0,
            1e-4, -2e-4, 1.0,
        );
        let sources = [
            Point2::new(10.0, 20.0),
            Point2::new(300.0, 25.0),
            Point2::new(280.0, 210.0),
            Point2::new(15.0, 240.0),
        ];
        let matches = matches_through(&truth, &sources);
        let h = FourPoint::new().from_matches(matches.iter()).unwrap();
        for m in &matches {
            assert!(h.residual(m) < 1e-6, "residual: {}", h.residual(m));
        }
        // Also maps a point not in the sample.
        let probe = Point2::new(150.0, 110.0);
        let expected = Point2::from_homogeneous(truth * probe.to_homogeneous()).unwrap();
        let mapped = h.transform(probe).unwrap();
        assert!((mapped - expected).norm() < 1e-6);
    }

    #[test]
    fn collinear_sample_is_degenerate() {
        let sources = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(35.0, 35.0),
        ];
        let matches: ArrayVec<FeatureMatch<KeyPoint>, 8> = sources
            .iter()
            .map(|&a| FeatureMatch(KeyPoint(a), KeyPoint(Point2::new(a.x + 5.0, a.y - 3.0))))
            .collect();
        assert!(FourPoint::new().from_matches(matches.iter()).is_none());
    }
}
