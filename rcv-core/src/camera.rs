use crate::{Bearing, ImagePoint, KeyPoint};

/// Allows conversion between a point on an image and the camera's internal
/// projection, which can describe the bearing of the projection out of the
/// camera.
pub trait CameraModel {
    /// The projection type produced by calibration, typically a normalized
    /// keypoint.
    type Projection: Bearing;

    /// Extracts the projection from a pixel location in an image.
    fn calibrate<P>(&self, point: P) -> Self::Projection
    where
        P: ImagePoint;

    /// Converts the projection back into raw pixel coordinates.
    fn uncalibrate(&self, projection: Self::Projection) -> KeyPoint;
}
