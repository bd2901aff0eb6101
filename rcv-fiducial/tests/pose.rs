use approx::assert_relative_eq;
use nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use rcv_core::{CameraModel, KeyPoint, Pose};
use rcv_fiducial::{QuadPoseEstimator, Quadrilateral};
use rcv_pinhole::{CameraIntrinsics, CameraIntrinsicsK1Distortion, NormalizedKeyPoint};

fn lens(k1: f64) -> CameraIntrinsicsK1Distortion {
    CameraIntrinsicsK1Distortion::new(
        CameraIntrinsics::identity()
            .focals(Vector2::new(600.0, 600.0))
            .principal_point(Point2::new(320.0, 240.0)),
        k1,
    )
}

/// Fiducial corners in the estimator's convention for a marker of the given
/// half extent.
fn fiducial_corners(half: f64) -> [Point3<f64>; 4] {
    [
        Point3::new(-half, half, 0.0),
        Point3::new(half, half, 0.0),
        Point3::new(half, -half, 0.0),
        Point3::new(-half, -half, 0.0),
    ]
}

/// Projects the fiducial corners through the pose and lens into distorted
/// pixels.
fn project_quad(
    pose: &IsometryMatrix3<f64>,
    lens: &CameraIntrinsicsK1Distortion,
    half: f64,
) -> Quadrilateral {
    Quadrilateral(fiducial_corners(half).map(|corner| {
        let camera = pose * corner;
        let normalized = NormalizedKeyPoint((camera.coords.xy() / camera.z).into());
        lens.uncalibrate(normalized).0
    }))
}

#[test]
fn recovers_exact_pose_without_distortion() {
    let lens = lens(0.0);
    let truth = IsometryMatrix3::from_parts(
        Vector3::new(0.08, -0.05, 1.4).into(),
        Rotation3::from_euler_angles(0.4, 0.3, -0.2),
    );
    let quad = project_quad(&truth, &lens, 0.5);

    let mut estimator = QuadPoseEstimator::new();
    estimator.set_fiducial(0.5, 0.5);
    estimator.set_lens_distortion(lens);
    assert!(estimator.process(&quad));

    let pose = estimator.world_to_camera().unwrap();
    let angle = pose.0.rotation.rotation_to(&truth.rotation).angle();
    assert!(angle < 1e-6, "rotation angle error: {}", angle);
    let translation_error = (pose.0.translation.vector - truth.translation.vector).norm();
    assert!(translation_error < 1e-6, "translation error: {}", translation_error);
    assert!(estimator.error().unwrap() < 1e-10);
}

#[test]
fn recovers_pose_through_lens_distortion() {
    let lens = lens(-0.15);
    let truth = IsometryMatrix3::from_parts(
        Vector3::new(-0.1, 0.12, 1.8).into(),
        Rotation3::from_euler_angles(-0.3, 0.25, 0.15),
    );
    let quad = project_quad(&truth, &lens, 0.4);

    let mut estimator = QuadPoseEstimator::new();
    estimator.set_fiducial(0.4, 0.4);
    estimator.set_lens_distortion(lens);
    assert!(estimator.process(&quad));

    let pose = estimator.world_to_camera().unwrap();
    let angle = pose.0.rotation.rotation_to(&truth.rotation).angle();
    assert!(angle < 1e-6, "rotation angle error: {}", angle);
    assert_relative_eq!(
        pose.0.translation.vector,
        truth.translation.vector,
        epsilon = 1e-6
    );
}

#[test]
fn fails_without_a_lens_model() {
    let mut estimator = QuadPoseEstimator::new();
    estimator.set_fiducial(0.5, 0.5);
    let quad = Quadrilateral([
        Point2::new(100.0, 100.0),
        Point2::new(200.0, 100.0),
        Point2::new(200.0, 200.0),
        Point2::new(100.0, 200.0),
    ]);
    assert!(!estimator.process(&quad));
    assert!(estimator.world_to_camera().is_none());
}

#[test]
fn small_head_on_quad_still_estimates() {
    let lens = lens(0.0);
    // A marker seen almost head-on and small in the image: the projected
    // quad is ~43 pixels per side, which routes through the enlargement
    // correction.
    let truth = IsometryMatrix3::from_parts(
        Vector3::new(0.02, 0.01, 7.0).into(),
        Rotation3::from_euler_angles(0.02, -0.015, 0.01),
    );
    let quad = project_quad(&truth, &lens, 0.25);
    let sides = quad.side_lengths();
    assert!(sides.iter().all(|&s| s < 60.0), "sides: {:?}", sides);

    let mut estimator = QuadPoseEstimator::new();
    estimator.set_fiducial(0.25, 0.25);
    estimator.set_lens_distortion(lens);
    assert!(estimator.process(&quad));

    // With perfect observations even the pathological branch must keep the
    // translation accurate; orientation is the weakly observable part.
    let pose = estimator.world_to_camera().unwrap();
    assert_relative_eq!(
        pose.0.translation.vector,
        truth.translation.vector,
        epsilon = 1e-3
    );
    assert!(estimator.error().unwrap().is_finite());

    // The same scene with the correction disabled also succeeds.
    let mut plain = QuadPoseEstimator::new();
    plain.enlarge_correction = false;
    plain.set_fiducial(0.25, 0.25);
    plain.set_lens_distortion(lens);
    assert!(plain.process(&quad));
    let angle = plain
        .world_to_camera()
        .unwrap()
        .0
        .rotation
        .rotation_to(&truth.rotation)
        .angle();
    assert!(angle < 1e-5, "rotation angle error: {}", angle);
}

#[test]
fn key_point_projection_matches_lens_round_trip() {
    // The estimator relies on calibrate/uncalibrate being exact inverses.
    let lens = lens(-0.2);
    let pixel = KeyPoint(Point2::new(410.5, 131.25));
    let normalized = lens.calibrate(pixel);
    let back = lens.uncalibrate(normalized);
    assert_relative_eq!(pixel.0, back.0, epsilon = 1e-9);
}
