use nalgebra::{IsometryMatrix3, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use rcv_core::sample_consensus::Model;
use rcv_core::{
    CameraModel, CameraPoint, CameraToCamera, FeatureMatch, FeatureWorldMatch, KeyPoint, Pose,
    WorldToCamera,
};
use rcv_optimize::{refine_fundamental, refine_homography, refine_pose};
use rcv_pinhole::{CameraIntrinsics, EssentialMatrix, FundamentalMatrix, NormalizedKeyPoint};

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(750.0, 740.0))
        .principal_point(Point2::new(320.0, 240.0))
}

#[test]
fn pose_refinement_recovers_perturbed_pose() {
    let truth = WorldToCamera(IsometryMatrix3::from_parts(
        Vector3::new(0.1, -0.2, 0.5).into(),
        Rotation3::from_euler_angles(0.2, -0.15, 0.1),
    ));
    let world = [
        Point3::new(-0.4, -0.3, 2.0),
        Point3::new(0.5, -0.2, 2.5),
        Point3::new(0.3, 0.4, 3.0),
        Point3::new(-0.2, 0.3, 2.2),
        Point3::new(0.05, 0.0, 2.7),
    ];
    let landmarks: Vec<FeatureWorldMatch<NormalizedKeyPoint>> = world
        .iter()
        .map(|&w| {
            let world_point: rcv_core::WorldPoint = w.to_homogeneous().into();
            let camera = truth.transform(world_point);
            FeatureWorldMatch(
                NormalizedKeyPoint::from_camera_point(camera).unwrap(),
                world_point,
            )
        })
        .collect();

    // Disturb the pose; the optimizer must pull it back onto the data.
    let perturbed = WorldToCamera(
        IsometryMatrix3::from_parts(
            Vector3::new(0.02, -0.01, 0.015).into(),
            Rotation3::from_euler_angles(0.01, -0.008, 0.012),
        ) * truth.0,
    );
    let initial_error: f64 = landmarks.iter().map(|l| perturbed.residual(l)).sum();
    assert!(initial_error > 1e-3);

    let refined = refine_pose(perturbed, &landmarks).expect("refinement failed");
    let final_error: f64 = landmarks.iter().map(|l| refined.residual(l)).sum();
    assert!(final_error < 1e-9, "final error: {}", final_error);

    let angle = refined
        .isometry()
        .rotation
        .rotation_to(&truth.isometry().rotation)
        .angle();
    assert!(angle < 1e-6, "rotation angle error: {}", angle);
    let translation_error = (refined.isometry().translation.vector
        - truth.isometry().translation.vector)
        .norm();
    assert!(translation_error < 1e-6, "translation error: {}", translation_error);
}

#[test]
fn pose_refinement_never_mutates_inputs() {
    let pose = WorldToCamera(IsometryMatrix3::from_parts(
        Vector3::new(0.0, 0.0, 1.0).into(),
        Rotation3::identity(),
    ));
    let landmarks = vec![
        FeatureWorldMatch(
            NormalizedKeyPoint(Point2::new(0.1, 0.1)),
            Point3::new(0.2, 0.2, 1.0).to_homogeneous().into(),
        ),
        FeatureWorldMatch(
            NormalizedKeyPoint(Point2::new(-0.1, 0.05)),
            Point3::new(-0.2, 0.1, 1.1).to_homogeneous().into(),
        ),
        FeatureWorldMatch(
            NormalizedKeyPoint(Point2::new(0.3, -0.2)),
            Point3::new(0.6, -0.4, 1.0).to_homogeneous().into(),
        ),
    ];
    let landmarks_before = landmarks.clone();
    let pose_before = pose;
    let _ = refine_pose(pose, &landmarks);
    assert_eq!(pose_before.0, pose.0);
    for (before, after) in landmarks_before.iter().zip(&landmarks) {
        assert_eq!(before.0 .0, after.0 .0);
    }
}

#[test]
fn fundamental_refinement_reduces_sampson_error() {
    let k = intrinsics();
    let pose = CameraToCamera(IsometryMatrix3::from_parts(
        Vector3::new(-0.3, 0.05, 0.2).into(),
        Rotation3::from_euler_angles(0.06, -0.1, 0.04),
    ));
    let truth =
        FundamentalMatrix::from_pose(EssentialMatrix::from(pose), &k, &k).unwrap();

    let matches: Vec<FeatureMatch<KeyPoint>> = [
        Point3::new(-0.8, -0.5, 4.0),
        Point3::new(0.7, -0.4, 5.0),
        Point3::new(0.5, 0.6, 4.5),
        Point3::new(-0.4, 0.5, 6.0),
        Point3::new(0.1, 0.1, 5.5),
        Point3::new(-0.9, 0.2, 4.2),
        Point3::new(0.8, 0.7, 6.5),
        Point3::new(0.2, -0.7, 4.8),
        Point3::new(-0.3, -0.1, 5.2),
        Point3::new(0.4, 0.2, 4.4),
    ]
    .iter()
    .map(|&p| {
        let point_a = CameraPoint(p.to_homogeneous());
        let point_b = pose.transform(point_a);
        let a = NormalizedKeyPoint::from_camera_point(point_a).unwrap();
        let b = NormalizedKeyPoint::from_camera_point(point_b).unwrap();
        FeatureMatch(k.uncalibrate(a), k.uncalibrate(b))
    })
    .collect();

    // Start from a slightly wrong matrix.
    let perturbation = Matrix3::new(1e-9, -2e-9, 3e-7, 2e-9, 1e-9, -2e-7, -3e-7, 2e-7, 1e-6);
    let initial = FundamentalMatrix(truth.normalize().unwrap().0 + perturbation);
    let initial_mean: f64 = matches
        .iter()
        .map(|m| initial.sampson_distance(m))
        .sum::<f64>()
        / matches.len() as f64;
    assert!(initial_mean > 1e-12);

    let refined = refine_fundamental(initial, &matches).expect("refinement failed");
    let refined_mean: f64 = matches
        .iter()
        .map(|m| refined.sampson_distance(m))
        .sum::<f64>()
        / matches.len() as f64;
    assert!(
        refined_mean <= initial_mean,
        "refinement made the error worse: {} > {}",
        refined_mean,
        initial_mean
    );
    assert!(refined_mean < 1e-10, "refined mean: {}", refined_mean);
}

#[test]
fn homography_refinement_recovers_perturbed_transform() {
    #[rustfmt::skip]
    let truth = Matrix3::new(
        1.1,  0.05,  20.0,
        -0.02, 0.95, -8.0,
        5e-5, -8e-5, 1.0,
    );
    let truth = truth / truth.norm();
    let sources = [
        Point2::new(20.0, 30.0),
        Point2::new(310.0, 40.0),
        Point2::new(290.0, 220.0),
        Point2::new(25.0, 230.0),
        Point2::new(160.0, 120.0),
        Point2::new(80.0, 180.0),
    ];
    let matches: Vec<FeatureMatch<KeyPoint>> = sources
        .iter()
        .map(|&a| {
            let b = Point2::from_homogeneous(truth * a.to_homogeneous()).unwrap();
            FeatureMatch(KeyPoint(a), KeyPoint(b))
        })
        .collect();

    let initial = four_point::Homography(truth + Matrix3::new(
        1e-6, 0.0, 1e-4, 0.0, -1e-6, 2e-4, 1e-9, -1e-9, 0.0,
    ));
    let initial_error: f64 = matches.iter().map(|m| initial.residual(m)).sum();
    assert!(initial_error > 1e-6);

    let refined = refine_homography(initial, &matches).expect("refinement failed");
    let refined_error: f64 = matches.iter().map(|m| refined.residual(m)).sum();
    assert!(refined_error <= initial_error);
    assert!(refined_error < 1e-8, "refined error: {}", refined_error);
}
