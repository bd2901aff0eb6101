use crate::WorldPoint;

/// A pair of observations of the same physical feature in two images.
///
/// `P` is the observation type, typically a pixel keypoint or a normalized
/// keypoint. The pair itself is a plain value; collections of matches are
/// owned by the caller and passed to estimators by iterator.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureMatch<P>(pub P, pub P);

/// An observation of a known 3d world point in one image.
///
/// Used by perspective-n-point solvers, where the 3d coordinates of the
/// feature are known in advance (for instance the corners of a fiducial).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureWorldMatch<P>(pub P, pub WorldPoint);
