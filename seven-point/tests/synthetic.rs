use nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rcv_core::sample_consensus::{Estimator, Model};
use rcv_core::{CameraModel, CameraPoint, CameraToCamera, FeatureMatch, KeyPoint, Pose};
use rcv_pinhole::{CameraIntrinsics, NormalizedKeyPoint};
use seven_point::{EightPoint, SevenPoint};

const RESIDUAL_THRESHOLD: f64 = 1e-6;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(800.0, 790.0))
        .principal_point(Point2::new(320.0, 240.0))
}

fn synthetic_matches(count: usize, seed: u64) -> Vec<FeatureMatch<KeyPoint>> {
    let k = intrinsics();
    let pose = CameraToCamera(IsometryMatrix3::from_parts(
        Vector3::new(-0.4, 0.1, 0.3).into(),
        Rotation3::from_euler_angles(0.08, -0.12, 0.05),
    ));
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let point_a = CameraPoint(
                Point3::new(
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(3.0..8.0),
                )
                .to_homogeneous(),
            );
            let point_b = pose.transform(point_a);
            let a = NormalizedKeyPoint::from_camera_point(point_a).unwrap();
            let b = NormalizedKeyPoint::from_camera_point(point_b).unwrap();
            FeatureMatch(k.uncalibrate(a), k.uncalibrate(b))
        })
        .collect()
}

#[test]
fn eight_point_satisfies_epipolar_constraint() {
    let matches = synthetic_matches(16, 0);
    let f = EightPoint::new()
        .from_matches(matches.iter())
        .expect("eight point failed on synthetic data");
    for m in &matches {
        assert!(
            f.residual(m) < RESIDUAL_THRESHOLD,
            "sampson residual too large: {}",
            f.residual(m)
        );
    }
}

#[test]
fn eight_point_result_is_scale_invariant() {
    let matches = synthetic_matches(16, 1);
    let f = EightPoint::new().from_matches(matches.iter()).unwrap();
    let scaled = rcv_pinhole::FundamentalMatrix(f.0 * 17.0);
    for m in &matches {
        assert!((f.residual(m) - scaled.residual(m)).abs() < 1e-9);
    }
}

#[test]
fn seven_point_contains_consistent_candidate() {
    let matches = synthetic_matches(8, 2);
    let candidates = SevenPoint::new().from_matches(matches[..7].iter());
    assert!(!candidates.is_empty(), "seven point produced no candidates");
    // All candidates fit the sample itself.
    for f in &candidates {
        for m in &matches[..7] {
            assert!(f.residual(m) < RESIDUAL_THRESHOLD);
        }
    }
    // At least one candidate generalizes to the held-out match.
    assert!(candidates
        .iter()
        .any(|f| f.residual(&matches[7]) < RESIDUAL_THRESHOLD));
}

#[test]
fn estimator_interface_draws_minimal_samples() {
    let matches = synthetic_matches(8, 3);
    let models: Vec<_> = Estimator::estimate(&EightPoint::new(), matches.iter().cloned())
        .into_iter()
        .collect();
    assert_eq!(models.len(), 1);
    let models: Vec<_> = Estimator::estimate(&SevenPoint::new(), matches.iter().cloned())
        .into_iter()
        .collect();
    assert!((1..=3).contains(&models.len()));
}
