use nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rcv::camera::CameraIntrinsics;
use rcv::estimate::EightPoint;
use rcv::optimize::refine_fundamental;
use rcv::{
    robust_fundamental, robust_pose, simple_fundamental, CameraModel, CameraPoint, CameraToCamera,
    FeatureMatch, FeatureWorldMatch, KeyPoint, NormalizedKeyPoint, Pose,
};
use rcv_core::sample_consensus::Model;

const TRUE_MATCHES: usize = 50;
const OUTLIERS: usize = 12;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(820.0, 810.0))
        .principal_point(Point2::new(400.0, 300.0))
}

/// Two-view scene: TRUE_MATCHES correct correspondences with slight pixel
/// noise followed by OUTLIERS random mismatches (roughly 20% outliers).
fn two_view_matches(seed: u64) -> Vec<FeatureMatch<KeyPoint>> {
    let k = intrinsics();
    let pose = CameraToCamera(IsometryMatrix3::from_parts(
        Vector3::new(-0.5, 0.15, 0.25).into(),
        Rotation3::from_euler_angles(0.1, -0.07, 0.04),
    ));
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut matches: Vec<FeatureMatch<KeyPoint>> = (0..TRUE_MATCHES)
        .map(|_| {
            let point_a = CameraPoint(
                Point3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(4.0..10.0),
                )
                .to_homogeneous(),
            );
            let point_b = pose.transform(point_a);
            let a = k.uncalibrate(NormalizedKeyPoint::from_camera_point(point_a).unwrap());
            let b = k.uncalibrate(NormalizedKeyPoint::from_camera_point(point_b).unwrap());
            let noise = |rng: &mut SmallRng| rng.gen_range(-0.05..0.05);
            FeatureMatch(
                KeyPoint(Point2::new(a.x + noise(&mut rng), a.y + noise(&mut rng))),
                KeyPoint(Point2::new(b.x + noise(&mut rng), b.y + noise(&mut rng))),
            )
        })
        .collect();
    matches.extend((0..OUTLIERS).map(|_| {
        FeatureMatch(
            KeyPoint(Point2::new(
                rng.gen_range(0.0..800.0),
                rng.gen_range(0.0..600.0),
            )),
            KeyPoint(Point2::new(
                rng.gen_range(0.0..800.0),
                rng.gen_range(0.0..600.0),
            )),
        )
    }));
    matches
}

#[test]
fn robust_fundamental_survives_outliers() {
    let matches = two_view_matches(100);
    let (f, inliers) = robust_fundamental(&matches, 1.0, 0).expect("robust fit failed");

    // More than 70% of the true correspondences are recovered as inliers.
    let true_inliers = inliers.iter().filter(|&&ix| ix < TRUE_MATCHES).count();
    assert!(
        true_inliers > TRUE_MATCHES * 7 / 10,
        "only {} true inliers",
        true_inliers
    );

    // Accepted inliers satisfy the epipolar constraint within a small
    // tolerance (scale-invariant through the Sampson distance).
    for &ix in &inliers {
        assert!(f.residual(&matches[ix]) < 1.0);
    }
}

#[test]
fn robust_fundamental_is_deterministic() {
    let matches = two_view_matches(101);
    let (f_a, inliers_a) = robust_fundamental(&matches, 1.0, 9).unwrap();
    let (f_b, inliers_b) = robust_fundamental(&matches, 1.0, 9).unwrap();
    assert_eq!(f_a.0, f_b.0);
    assert_eq!(inliers_a, inliers_b);
}

#[test]
fn refinement_reduces_mean_sampson_error() {
    let matches = two_view_matches(102);
    let (_, inliers) = robust_fundamental(&matches, 1.0, 0).unwrap();
    let inlier_matches: Vec<FeatureMatch<KeyPoint>> =
        inliers.iter().map(|&ix| matches[ix]).collect();

    let linear = EightPoint::new()
        .from_matches(inlier_matches.iter())
        .unwrap();
    let refined = refine_fundamental(linear, &inlier_matches).unwrap();

    let mean = |f: &rcv::FundamentalMatrix| {
        inlier_matches
            .iter()
            .map(|m| f.sampson_distance(m))
            .sum::<f64>()
            / inlier_matches.len() as f64
    };
    assert!(
        mean(&refined) <= mean(&linear),
        "refinement made the error worse: {} > {}",
        mean(&refined),
        mean(&linear)
    );
}

#[test]
fn simple_fundamental_fits_clean_matches() {
    let matches: Vec<FeatureMatch<KeyPoint>> = two_view_matches(103)
        .into_iter()
        .take(TRUE_MATCHES)
        .collect();
    let f = simple_fundamental(&matches).expect("simple fit failed");
    let mean: f64 = matches.iter().map(|m| f.residual(m)).sum::<f64>() / matches.len() as f64;
    assert!(mean < 0.5, "mean residual: {}", mean);
}

#[test]
fn robust_pose_survives_outliers() {
    let pose = IsometryMatrix3::from_parts(
        Vector3::new(0.1, 0.2, 0.3).into(),
        Rotation3::from_euler_angles(0.1, 0.2, 0.3),
    );
    let mut rng = SmallRng::seed_from_u64(5);
    let mut landmarks: Vec<FeatureWorldMatch<NormalizedKeyPoint>> = (0..20)
        .map(|_| {
            let camera = Point3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(1.0..4.0),
            );
            let world = pose.inverse() * camera;
            FeatureWorldMatch(
                NormalizedKeyPoint((camera.coords.xy() / camera.z).into()),
                world.to_homogeneous().into(),
            )
        })
        .collect();
    // Mismatched observations.
    landmarks.extend((0..5).map(|_| {
        FeatureWorldMatch(
            NormalizedKeyPoint(Point2::new(
                rng.gen_range(-0.8..0.8),
                rng.gen_range(-0.8..0.8),
            )),
            Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(1.0..5.0),
            )
            .to_homogeneous()
            .into(),
        )
    }));

    let (estimate, inliers) = robust_pose(&landmarks, 0.01, 4).expect("robust pose failed");
    assert!(inliers.len() >= 20 - 1, "inliers: {}", inliers.len());
    let angle = estimate
        .isometry()
        .rotation
        .rotation_to(&pose.rotation)
        .angle();
    assert!(angle < 1e-6, "rotation angle error: {}", angle);
    let translation_error =
        (estimate.isometry().translation.vector - pose.translation.vector).norm();
    assert!(translation_error < 1e-6, "translation error: {}", translation_error);
}
