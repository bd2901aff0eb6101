use nalgebra::Matrix2;
use rcv_core::{Bearing, CameraPoint, CameraToCamera, Pose, Projective};

/// Triangulates a point from two bearings and the relative pose of the
/// cameras using the midpoint method.
///
/// `pose` transforms the frame of camera A into the frame of camera B, `a` is
/// the observation in camera A and `b` the observation in camera B. The
/// returned point is in the frame of camera A.
///
/// Returns `None` when the rays are too close to parallel for the
/// intersection to be meaningful.
pub fn triangulate_relative_midpoint(
    pose: CameraToCamera,
    a: &impl Bearing,
    b: &impl Bearing,
) -> Option<CameraPoint> {
    let da = a.bearing().into_inner();
    // Everything is solved in the frame of camera A.
    let inverse = pose.isometry().inverse();
    let center_b = inverse.translation.vector;
    let db = inverse.rotation * b.bearing().into_inner();

    // Solve for the distances along each ray minimizing the distance
    // between the two closest points.
    let design = Matrix2::new(da.dot(&da), -da.dot(&db), da.dot(&db), -db.dot(&db));
    let rhs = nalgebra::Vector2::new(da.dot(&center_b), db.dot(&center_b));
    let solution = design.try_inverse()? * rhs;
    let (sa, sb) = (solution.x, solution.y);

    let closest_a = da * sa;
    let closest_b = center_b + db * sb;
    let midpoint = (closest_a + closest_b) * 0.5;
    if !midpoint.iter().all(|n| n.is_finite()) {
        return None;
    }
    Some(CameraPoint::from_point(midpoint.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{IsometryMatrix3, Point3, Rotation3, Vector3};
    use rcv_pinhole::NormalizedKeyPoint;

    #[test]
    fn recovers_exact_point() {
        let pose = CameraToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.3, -0.1, 0.2).into(),
            Rotation3::from_euler_angles(0.05, 0.1, -0.08),
        ));
        let point_a = CameraPoint(Point3::new(0.5, -0.3, 4.0).to_homogeneous());
        let point_b = pose.transform(point_a);
        let a = NormalizedKeyPoint::from_camera_point(point_a).unwrap();
        let b = NormalizedKeyPoint::from_camera_point(point_b).unwrap();

        let triangulated = triangulate_relative_midpoint(pose, &a, &b)
            .unwrap()
            .point()
            .unwrap();
        assert_relative_eq!(triangulated, point_a.point().unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn parallel_rays_fail() {
        // No translation means the two rays are identical.
        let pose = CameraToCamera(IsometryMatrix3::identity());
        let a = NormalizedKeyPoint(nalgebra::Point2::new(0.1, 0.2));
        assert!(triangulate_relative_midpoint(pose, &a, &a).is_none());
    }
}
