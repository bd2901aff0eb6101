//! This package solves camera pose estimation given three 3D points and
//! their corresponding image observations, generally known as
//! ["Perspective-n-Point" (PnP)][pnp] for the minimal case n = 3.
//!
//! The implementation follows Grunert's classical formulation: the law of
//! cosines relates the three unknown point depths through the pairwise
//! angles between the observation rays, and eliminating two depths yields a
//! quartic polynomial whose real roots give up to four geometrically valid
//! poses. A fourth correspondence (held out of the sample) is needed to
//! disambiguate between them, which is exactly what a consensus loop or the
//! quad pose estimator does with the remaining points.
//!
//! The review by Haralick et al., "Review and Analysis of Solutions of the
//! Three Point Perspective Pose Estimation Problem" (IJCV 1994), covers this
//! formulation in detail.
//!
//! [pnp]: https://en.wikipedia.org/wiki/Perspective-n-Point

#![no_std]
#![warn(missing_docs)]

use arrayvec::ArrayVec;
use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use num_traits::Float;
use rcv_core::{
    sample_consensus::Estimator, Bearing, FeatureWorldMatch, Pose, Projective, WorldToCamera,
};

type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;

/// The classical Grunert P3P solver. Estimates up to 4 potential
/// [`WorldToCamera`] poses from three world points and their observation
/// bearings.
///
/// Each solution satisfies `sᵢ yᵢ = R xᵢ + t` for the three
/// correspondences, where `xᵢ` are world coordinates, `yᵢ` are unit
/// bearings, and `sᵢ` are the recovered positive depths.
#[derive(Copy, Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct GrunertP3P {
    /// Number of Newton iterations used to polish each root of the quartic.
    pub root_polish_iterations: usize,
    /// This determines the number of iterations to spend converging on a
    /// proper rotation matrix.
    pub rotation_convergence_iterations: usize,
    /// The epsilon on which convergence is considered achieved for
    /// converging on a proper rotation.
    pub rotation_convergence_epsilon: f64,
}

impl GrunertP3P {
    /// Creates a default solver with 5 polish iterations per root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`GrunertP3P::root_polish_iterations`].
    #[must_use]
    pub fn root_polish_iterations(self, root_polish_iterations: usize) -> Self {
        Self {
            root_polish_iterations,
            ..self
        }
    }

    /// Compute the candidate poses of a camera from three 3D-to-2D
    /// correspondences.
    fn compute_poses<P: Bearing>(
        &self,
        samples: [FeatureWorldMatch<P>; 3],
    ) -> ArrayVec<WorldToCamera, 4> {
        let mut poses = ArrayVec::new();

        let mut world = [Vec3::zeros(); 3];
        for (out, FeatureWorldMatch(_, point)) in world.iter_mut().zip(&samples) {
            match point.point() {
                Some(p) => *out = p.coords,
                None => return poses,
            }
        }
        let bearings = [
            samples[0].0.bearing().into_inner(),
            samples[1].0.bearing().into_inner(),
            samples[2].0.bearing().into_inner(),
        ];

        // Squared side lengths of the world triangle; `a` is opposite point
        // 1, `b` opposite point 2, `c` opposite point 3.
        let a2 = (world[1] - world[2]).norm_squared();
        let b2 = (world[0] - world[2]).norm_squared();
        let c2 = (world[0] - world[1]).norm_squared();
        if a2 < f64::MIN_POSITIVE || b2 < f64::MIN_POSITIVE || c2 < f64::MIN_POSITIVE {
            return poses;
        }

        // Cosines of the angles between the observation rays.
        let cos_alpha = bearings[1].dot(&bearings[2]);
        let cos_beta = bearings[0].dot(&bearings[2]);
        let cos_gamma = bearings[0].dot(&bearings[1]);

        // With s2 = u s1 and s3 = v s1, the law-of-cosines system reduces to
        //
        //   u = N(v) / D(v)
        //   N(v)² + D(v)² (1 - G(v)) - 2 N(v) D(v) cos γ = 0
        //
        // where N is quadratic, D linear, and G(v) = (c²/b²)(1 + v² - 2 v cos β).
        // The second line is the Grunert quartic in v.
        let p = a2 / b2;
        let q = c2 / b2;
        let n = [p - q + 1.0, -2.0 * (p - q) * cos_beta, p - q - 1.0];
        let d = [2.0 * cos_gamma, -2.0 * cos_alpha];
        let g = [q, -2.0 * q * cos_beta, q];

        // Convolve the small polynomials into the quartic coefficients,
        // constant term first.
        let mut quartic = [0.0f64; 5];
        for (i, &ni) in n.iter().enumerate() {
            for (j, &nj) in n.iter().enumerate() {
                quartic[i + j] += ni * nj;
            }
        }
        let mut d2 = [0.0f64; 3];
        for (i, &di) in d.iter().enumerate() {
            for (j, &dj) in d.iter().enumerate() {
                d2[i + j] += di * dj;
            }
        }
        let one_minus_g = [1.0 - g[0], -g[1], -g[2]];
        for (i, &d2i) in d2.iter().enumerate() {
            for (j, &gj) in one_minus_g.iter().enumerate() {
                quartic[i + j] += d2i * gj;
            }
        }
        for (i, &ni) in n.iter().enumerate() {
            for (j, &dj) in d.iter().enumerate() {
                quartic[i + j] -= 2.0 * cos_gamma * ni * dj;
            }
        }

        for v in solve_quartic(quartic, self.root_polish_iterations) {
            if v <= 0.0 {
                continue;
            }
            let denominator = d[0] + d[1] * v;
            if Float::abs(denominator) < 1e-12 {
                continue;
            }
            let u = (n[0] + n[1] * v + n[2] * v * v) / denominator;
            if u <= 0.0 {
                continue;
            }
            let s1_sq = b2 / (1.0 + v * v - 2.0 * v * cos_beta);
            if s1_sq <= 0.0 || !s1_sq.is_finite() {
                continue;
            }
            let s1 = Float::sqrt(s1_sq);
            let depths = [s1, u * s1, v * s1];

            if let Some(pose) = self.pose_from_depths(&world, &bearings, depths) {
                if poses.is_full() {
                    break;
                }
                poses.push(pose);
            }
        }
        poses
    }

    /// Recovers the rigid transform taking world points onto the camera
    /// points `sᵢ yᵢ`.
    fn pose_from_depths(
        &self,
        world: &[Vec3; 3],
        bearings: &[Vec3; 3],
        depths: [f64; 3],
    ) -> Option<WorldToCamera> {
        let camera = [
            bearings[0] * depths[0],
            bearings[1] * depths[1],
            bearings[2] * depths[2],
        ];

        let d12 = world[0] - world[1];
        let d13 = world[0] - world[2];
        let d12xd13 = d12.cross(&d13);
        #[rustfmt::skip]
        let x_mat = Mat3::new(
            d12[0], d13[0], d12xd13[0],
            d12[1], d13[1], d12xd13[1],
            d12[2], d13[2], d12xd13[2],
        );
        let x_mat = x_mat.try_inverse()?;

        let y1 = camera[0] - camera[1];
        let y2 = camera[0] - camera[2];
        let y1xy2 = y1.cross(&y2);
        #[rustfmt::skip]
        let y_mat = Mat3::new(
            y1[0], y2[0], y1xy2[0],
            y1[1], y2[1], y1xy2[1],
            y1[2], y2[2], y1xy2[2],
        );

        let rot = y_mat * x_mat;
        let rotation = Rotation3::from_matrix_eps(
            &rot,
            self.rotation_convergence_epsilon,
            self.rotation_convergence_iterations,
            Rotation3::identity(),
        );
        let translation = camera[0] - rotation * world[0];
        if !translation.iter().all(|n| n.is_finite()) {
            return None;
        }
        Some(WorldToCamera::from_parts(translation, rotation))
    }
}

impl Default for GrunertP3P {
    fn default() -> Self {
        Self {
            root_polish_iterations: 5,
            rotation_convergence_iterations: 100,
            rotation_convergence_epsilon: 1e-12,
        }
    }
}

impl<P> Estimator<FeatureWorldMatch<P>> for GrunertP3P
where
    P: Bearing + Clone,
{
    type Model = WorldToCamera;
    type ModelIter = ArrayVec<WorldToCamera, 4>;
    const MIN_SAMPLES: usize = 3;

    fn estimate<I>(&self, mut data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureWorldMatch<P>> + Clone,
    {
        self.compute_poses([
            data.next()
                .expect("must provide 3 samples at minimum to GrunertP3P"),
            data.next()
                .expect("must provide 3 samples at minimum to GrunertP3P"),
            data.next()
                .expect("must provide 3 samples at minimum to GrunertP3P"),
        ])
    }
}

/// Real roots of the quartic `c[4] x⁴ + c[3] x³ + c[2] x² + c[1] x + c[0]`,
/// coefficients given constant term first.
///
/// The roots are located as the eigenvalues of the companion matrix and then
/// polished with Newton iterations on the original polynomial, which keeps
/// them accurate even for the clustered roots that near-degenerate triangles
/// produce.
fn solve_quartic(c: [f64; 5], polish_iterations: usize) -> ArrayVec<f64, 4> {
    let mut roots = ArrayVec::new();
    let scale = c.iter().fold(0.0f64, |acc, &x| Float::max(acc, Float::abs(x)));
    if scale < f64::MIN_POSITIVE {
        return roots;
    }
    if Float::abs(c[4]) < 1e-12 * scale {
        // The leading coefficient vanished; fall back to the cubic.
        for root in solve_cubic_monic(c[3], c[2], c[1], c[0]) {
            roots.push(root);
        }
        return roots;
    }

    let b3 = c[3] / c[4];
    let b2 = c[2] / c[4];
    let b1 = c[1] / c[4];
    let b0 = c[0] / c[4];
    #[rustfmt::skip]
    let companion = Matrix4::new(
        0.0, 0.0, 0.0, -b0,
        1.0, 0.0, 0.0, -b1,
        0.0, 1.0, 0.0, -b2,
        0.0, 0.0, 1.0, -b3,
    );
    for eigenvalue in companion.complex_eigenvalues().iter() {
        if Float::abs(eigenvalue.im) > 1e-6 * (1.0 + Float::abs(eigenvalue.re)) {
            continue;
        }
        let mut root = eigenvalue.re;
        for _ in 0..polish_iterations {
            let fx = (((root + b3) * root + b2) * root + b1) * root + b0;
            let fpx = ((4.0 * root + 3.0 * b3) * root + 2.0 * b2) * root + b1;
            if Float::abs(fpx) < f64::MIN_POSITIVE {
                break;
            }
            root -= fx / fpx;
        }
        if roots.iter().all(|&r| Float::abs(r - root) > 1e-10 * (1.0 + Float::abs(root)))
            && !roots.is_full()
        {
            roots.push(root);
        }
    }
    roots
}

/// Real roots of `x³ + b x² + c x + d`, used when the quartic degenerates.
fn solve_cubic_monic(a: f64, b: f64, c: f64, d: f64) -> ArrayVec<f64, 4> {
    let mut roots = ArrayVec::new();
    if Float::abs(a) < f64::MIN_POSITIVE {
        return roots;
    }
    let b2 = b / a;
    let c1 = c / a;
    let d0 = d / a;
    let p = c1 - b2 * b2 / 3.0;
    let q = 2.0 * b2 * b2 * b2 / 27.0 - b2 * c1 / 3.0 + d0;
    let shift = -b2 / 3.0;
    let discriminant = q * q / 4.0 + p * p * p / 27.0;
    if discriminant > 0.0 {
        let sq = Float::sqrt(discriminant);
        roots.push(Float::cbrt(-q / 2.0 + sq) + Float::cbrt(-q / 2.0 - sq) + shift);
    } else if Float::abs(p) < f64::MIN_POSITIVE {
        roots.push(shift);
    } else {
        let m = 2.0 * Float::sqrt(-p / 3.0);
        let theta = Float::acos(Float::max(-1.0, Float::min(1.0, 3.0 * q / (p * m)))) / 3.0;
        for k in 0..3 {
            roots.push(m * Float::cos(theta - 2.0 * core::f64::consts::PI * k as f64 / 3.0) + shift);
        }
    }
    roots
}
