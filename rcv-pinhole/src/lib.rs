//! This crate plugs into `rcv-core` and provides pinhole camera models with
//! and without distortion correction. It can be used to convert raw pixel
//! coordinates into normalized image coordinates (and back, through the
//! inverse distortion map), and it contains the epipolar model types: the
//! [`FundamentalMatrix`] for uncalibrated image pairs and the
//! [`EssentialMatrix`] for calibrated ones.

#![no_std]

mod essential;
mod fundamental;

pub use essential::*;
pub use fundamental::*;

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use rcv_core::{Bearing, CameraModel, CameraPoint, ImagePoint, KeyPoint, Projective};

use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use num_traits::Float;

/// A point in normalized image coordinates. This keypoint has been corrected
/// for distortion and normalized based on the camera intrinsic matrix.
///
/// The normalized keypoint lies on the virtual image plane at a depth of
/// `1.0` in front of the camera's optical center, with the unit of distance
/// being the focal length.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// Tries to convert the [`CameraPoint`] into a [`NormalizedKeyPoint`],
    /// but it may fail in extreme conditions (point at infinity or on the
    /// focal plane), in which case `None` is returned.
    pub fn from_camera_point(point: CameraPoint) -> Option<Self> {
        Point2::from_homogeneous(point.bearing_unnormalized()).map(Self)
    }

    /// Conceptually appends a `1.0` component to the normalized keypoint to
    /// create a [`CameraPoint`] on the virtual image plane and then
    /// multiplies the point by `depth`.
    pub fn with_depth(self, depth: f64) -> CameraPoint {
        (self.coords * depth).push(depth).to_homogeneous().into()
    }

    /// Get the virtual image point as a [`Point3`].
    ///
    /// The virtual image point is the point that is formed on the virtual
    /// image plane at a depth 1.0 in front of the camera.
    pub fn virtual_image_point(self) -> Point3<f64> {
        self.coords.push(1.0).into()
    }
}

impl Bearing for NormalizedKeyPoint {
    fn bearing_unnormalized(&self) -> Vector3<f64> {
        self.0.coords.push(1.0)
    }

    fn from_bearing_vector(bearing: Vector3<f64>) -> Self {
        Self((bearing.xy() / bearing.z).into())
    }
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// For a high quality camera, this may be sufficient to normalize image
/// coordinates. Undistortion may also be necessary to normalize image
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic
    /// matrix. This would imply that the pixel positions have an origin at
    /// `0,0`, the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    #[must_use]
    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }
}

impl CameraModel for CameraIntrinsics {
    type Projection = NormalizedKeyPoint;

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        let centered = Point2::new(x, y);
        KeyPoint(centered + self.principal_point.coords)
    }
}

/// This contains intrinsic camera parameters including one radial distortion
/// coefficient (K1).
///
/// The model is bidirectional: [`CameraModel::calibrate`] removes distortion
/// going from raw pixels to normalized coordinates, and
/// [`CameraModel::uncalibrate`] applies it back using the closed-form
/// inverse, so points can be taken round trip between the distorted image and
/// the normalized image plane.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CameraIntrinsicsK1Distortion {
    pub simple_intrinsics: CameraIntrinsics,
    pub k1: f64,
}

impl CameraIntrinsicsK1Distortion {
    /// Creates the camera intrinsics using simple intrinsics with no
    /// distortion and a K1 distortion coefficient.
    pub fn new(simple_intrinsics: CameraIntrinsics, k1: f64) -> Self {
        Self {
            simple_intrinsics,
            k1,
        }
    }
}

impl CameraModel for CameraIntrinsicsK1Distortion {
    type Projection = NormalizedKeyPoint;

    /// Takes in a point from an image in pixel coordinates and converts it to
    /// a [`NormalizedKeyPoint`], removing the radial distortion.
    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let NormalizedKeyPoint(distorted) = self.simple_intrinsics.calibrate(point);
        let r2 = distorted.coords.norm_squared();
        let undistorted = (distorted.coords / (1.0 + self.k1 * r2)).into();

        NormalizedKeyPoint(undistorted)
    }

    /// Converts a [`NormalizedKeyPoint`] back into distorted pixel
    /// coordinates.
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let NormalizedKeyPoint(undistorted) = projection;
        // Solving the quadratic in r^2 formed by the undistorted radius
        // yields this expression for the distorted radius.
        let u2 = undistorted.coords.norm_squared();
        let r2_mul_k1 = if self.k1.abs() * u2 < 1e-14 {
            // The limit of the expression below as k1 -> 0.
            self.k1 * u2
        } else {
            -(2.0 * self.k1 * u2 + Float::sqrt(1.0 - 4.0 * self.k1 * u2) - 1.0)
                / (2.0 * self.k1 * u2)
        };
        self.simple_intrinsics.uncalibrate(NormalizedKeyPoint(
            (undistorted.coords * (1.0 + r2_mul_k1)).into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn calibrate_uncalibrate_round_trip() {
        let intrinsics = CameraIntrinsics {
            focals: Vector2::new(800.0, 900.0),
            principal_point: Point2::new(500.0, 600.0),
            skew: 1.7,
        };
        let kp = KeyPoint(Point2::new(471.0, 322.0));
        let nkp = intrinsics.calibrate(kp);
        let ukp = intrinsics.uncalibrate(nkp);
        assert_relative_eq!(kp.0, ukp.0, epsilon = 1e-9);
    }

    #[test]
    fn distortion_round_trip() {
        let intrinsics = CameraIntrinsicsK1Distortion::new(
            CameraIntrinsics {
                focals: Vector2::new(800.0, 900.0),
                principal_point: Point2::new(500.0, 600.0),
                skew: 0.0,
            },
            -0.164624,
        );
        let kp = KeyPoint(Point2::new(471.0, 322.0));
        let nkp = intrinsics.calibrate(kp);
        let ukp = intrinsics.uncalibrate(nkp);
        assert_relative_eq!(kp.0, ukp.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_distortion_matches_simple_model() {
        let simple = CameraIntrinsics::identity().focal(720.0);
        let intrinsics = CameraIntrinsicsK1Distortion::new(simple, 0.0);
        let kp = KeyPoint(Point2::new(13.5, -22.25));
        assert_relative_eq!(
            intrinsics.calibrate(kp).0,
            simple.calibrate(kp).0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            intrinsics.uncalibrate(simple.calibrate(kp)).0,
            kp.0,
            epsilon = 1e-9
        );
    }
}
