use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Unit, Vector3, Vector4};

/// This trait is implemented for homogeneous projective 3d coordinates.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// Retrieve the homogeneous vector.
    ///
    /// No constraints are put on this vector. All components can move freely
    /// and it is not normalized, although it may be normalized without
    /// changing the point it represents.
    fn homogeneous(self) -> Vector4<f64>;

    /// Retrieve the euclidean 3d point by normalizing the homogeneous
    /// coordinate.
    ///
    /// This may fail, as a homogeneous coordinate can exist at near-infinity,
    /// whereas a euclidean point cannot.
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    /// Convert a euclidean 3d point into homogeneous coordinates.
    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// Create the projective point from a homogeneous vector.
    fn from_homogeneous(vector: Vector4<f64>) -> Self {
        vector.into()
    }

    /// Retrieve the normalized bearing of the coordinate.
    fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Retrieve the unnormalized bearing of the coordinate.
    fn bearing_unnormalized(self) -> Vector3<f64> {
        self.homogeneous().xyz()
    }
}

/// Observations that can be converted to a 3d direction out of the camera's
/// optical center.
///
/// The bearing's X axis points right, Y axis points down, and Z axis points
/// forwards, matching image conventions.
pub trait Bearing {
    /// Retrieve the bearing without normalizing its length.
    fn bearing_unnormalized(&self) -> Vector3<f64>;

    /// Retrieve the unit-length bearing.
    fn bearing(&self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Create the observation from a bearing vector.
    fn from_bearing_vector(bearing: Vector3<f64>) -> Self;
}

/// A 3d point relative to the camera's optical center and orientation, where
/// the positive X axis is right, positive Y axis is down, and positive Z axis
/// is forwards from the optical center of the camera.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct CameraPoint(pub Vector4<f64>);

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A point in "world" coordinates.
///
/// For a fiducial target, the world frame is the fiducial's own frame (the
/// marker plane at `z = 0` with the origin at its center). For two-view
/// reconstruction the unit of distance is arbitrary and relative to the
/// current reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct WorldPoint(pub Vector4<f64>);

impl Projective for WorldPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}
