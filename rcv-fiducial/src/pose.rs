use crate::Quadrilateral;
use epnp::Epnp;
use grunert::GrunertP3P;
use log::trace;
use nalgebra::Point3;
use rcv_core::{
    sample_consensus::Estimator, CameraModel, FeatureWorldMatch, KeyPoint, Pose, Projective,
    WorldToCamera,
};
use rcv_optimize::refine_pose;
use rcv_pinhole::{CameraIntrinsicsK1Distortion, NormalizedKeyPoint};

/// A quad is only considered for the near-head-on correction when its
/// shortest side is at least this fraction of its longest side.
const NEARLY_SQUARE_RATIO: f64 = 0.9;

/// Estimates the 3d pose of a known planar square fiducial from its four
/// observed corners.
///
/// Four pixel observations of the four known fiducial corners
/// over-determine the pose, but only barely, and the minimal P3P solvers
/// that exploit them produce multiple candidates. The estimator runs P3P on
/// every 3-of-4 corner subset, scores all candidates by their *maximum*
/// squared corner reprojection error in pixels (a single badly fitting
/// corner disqualifies a pose even if the other three fit well), falls back
/// to EPnP over all four corners when the best candidate is still poor, and
/// finally polishes the winner with non-linear optimization.
///
/// Fiducials seen nearly head-on and small in the image are a pathological
/// case: orientation barely affects reprojection error, so the optimizer
/// trades orientation error for sub-pixel translation gains and the reported
/// orientation becomes erratic. The mitigation re-estimates the pose on an
/// artificially enlarged copy of the quad, where the same angular error
/// costs much more reprojection error, and splices that rotation onto the
/// original estimate's translation. The enlargement factor and the error
/// fudge allowed when accepting the spliced pose are empirical constants;
/// they are exposed as fields rather than presented as derived truths.
///
/// Instances hold reusable scratch state and are not safe for concurrent
/// use from multiple threads.
#[derive(Debug, Clone)]
pub struct QuadPoseEstimator {
    /// Squared pixel reprojection error above which the EPnP fallback is
    /// consulted after P3P.
    pub epnp_fallback_threshold: f64,
    /// Apply the near-head-on correction.
    pub enlarge_correction: bool,
    /// Scale factor applied about the quad centroid for the correction.
    pub enlarge_factor: f64,
    /// Extra squared-pixel error the spliced pose may cost over the plain
    /// estimate and still be accepted.
    pub enlarge_fudge: f64,
    /// Longest side, in pixels, under which a near-square quad is treated
    /// as a pathological head-on observation.
    pub small_quad_side: f64,
    p3p: GrunertP3P,
    epnp: Epnp,
    intrinsics: Option<CameraIntrinsicsK1Distortion>,
    fiducial: [Point3<f64>; 4],
    best: Option<(WorldToCamera, f64)>,
}

impl QuadPoseEstimator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Defines the fiducial geometry: corners at `(±half_width,
    /// ±half_height)` on the plane `z = 0`, ordered counter-clockwise in the
    /// fiducial frame starting at `(-half_width, half_height)`.
    ///
    /// Observed quad corner `i` is matched against fiducial corner `i`.
    pub fn set_fiducial(&mut self, half_width: f64, half_height: f64) {
        self.fiducial = [
            Point3::new(-half_width, half_height, 0.0),
            Point3::new(half_width, half_height, 0.0),
            Point3::new(half_width, -half_height, 0.0),
            Point3::new(-half_width, -half_height, 0.0),
        ];
    }

    /// Sets the lens model used to convert the observed (distorted) pixel
    /// corners into normalized image coordinates and back.
    pub fn set_lens_distortion(&mut self, intrinsics: CameraIntrinsicsK1Distortion) {
        self.intrinsics = Some(intrinsics);
    }

    /// Estimates the pose from the four observed corners, in distorted pixel
    /// coordinates.
    ///
    /// Returns whether a pose was found; retrieve it with
    /// [`QuadPoseEstimator::world_to_camera`] and its quality with
    /// [`QuadPoseEstimator::error`]. Returns `false` if the lens model was
    /// not set or every candidate pose places a corner behind the camera.
    pub fn process(&mut self, quad: &Quadrilateral) -> bool {
        self.best = None;
        let Some((pose, error)) = self.estimate(quad) else {
            return false;
        };
        let mut chosen = (pose, error);

        if self.enlarge_correction && self.is_pathological(quad) {
            if let Some((enlarged_pose, _)) = self.estimate(&quad.enlarge(self.enlarge_factor)) {
                // Rotation from the enlarged quad, translation from the
                // original.
                let spliced = WorldToCamera::from_parts(
                    pose.isometry().translation.vector,
                    enlarged_pose.isometry().rotation,
                );
                if let Some(spliced_error) = self.max_squared_pixel_error(&spliced, quad) {
                    if spliced_error <= error + self.enlarge_fudge {
                        chosen = (spliced, spliced_error);
                    } else {
                        trace!(
                            "rejecting head-on correction: {} > {} + {}",
                            spliced_error,
                            error,
                            self.enlarge_fudge
                        );
                    }
                }
            }
        }

        self.best = Some(chosen);
        true
    }

    /// The fiducial-to-camera transform of the last successful
    /// [`QuadPoseEstimator::process`] call.
    pub fn world_to_camera(&self) -> Option<WorldToCamera> {
        self.best.map(|(pose, _)| pose)
    }

    /// The maximum squared corner reprojection error, in pixels, of the last
    /// successful [`QuadPoseEstimator::process`] call.
    pub fn error(&self) -> Option<f64> {
        self.best.map(|(_, error)| error)
    }

    /// Whether the quad is small and square enough in the image for
    /// orientation to be weakly observable.
    fn is_pathological(&self, quad: &Quadrilateral) -> bool {
        let sides = quad.side_lengths();
        let longest = sides.iter().cloned().fold(0.0f64, f64::max);
        let shortest = sides.iter().cloned().fold(f64::INFINITY, f64::min);
        longest <= self.small_quad_side && shortest >= NEARLY_SQUARE_RATIO * longest
    }

    /// Runs the multi-hypothesis estimation on one quad: P3P over every
    /// excluded-corner subset, EPnP fallback, non-linear polish.
    fn estimate(&self, quad: &Quadrilateral) -> Option<(WorldToCamera, f64)> {
        let intrinsics = self.intrinsics?;
        let landmarks = self.landmarks(quad, &intrinsics);

        let mut best: Option<(WorldToCamera, f64)> = None;
        for excluded in 0..4 {
            let sample = landmarks
                .iter()
                .enumerate()
                .filter(|&(ix, _)| ix != excluded)
                .map(|(_, &landmark)| landmark);
            for pose in self.p3p.estimate(sample) {
                let Some(error) = self.max_squared_pixel_error(&pose, quad) else {
                    continue;
                };
                if best.map(|(_, e)| error < e).unwrap_or(true) {
                    best = Some((pose, error));
                }
            }
        }

        // P3P fits three corners exactly and leaves the fourth to chance;
        // when even the best candidate misses badly, the all-corner EPnP
        // estimate is usually closer despite its different bias.
        if best.map(|(_, e)| e > self.epnp_fallback_threshold).unwrap_or(true) {
            if let Some(pose) = self.epnp.from_matches(landmarks.iter()) {
                if let Some(error) = self.max_squared_pixel_error(&pose, quad) {
                    if best.map(|(_, e)| error < e).unwrap_or(true) {
                        best = Some((pose, error));
                    }
                }
            }
        }

        let (pose, error) = best?;

        // Polish with non-linear optimization; a refinement failure keeps
        // the unrefined pose.
        if let Some(refined) = refine_pose(pose, &landmarks) {
            if let Some(refined_error) = self.max_squared_pixel_error(&refined, quad) {
                if refined_error <= error {
                    return Some((refined, refined_error));
                }
            }
        }
        Some((pose, error))
    }

    fn landmarks(
        &self,
        quad: &Quadrilateral,
        intrinsics: &CameraIntrinsicsK1Distortion,
    ) -> [FeatureWorldMatch<NormalizedKeyPoint>; 4] {
        let corners = quad.corners();
        [0usize, 1, 2, 3].map(|i| {
            FeatureWorldMatch(
                intrinsics.calibrate(KeyPoint(corners[i])),
                self.fiducial[i].to_homogeneous().into(),
            )
        })
    }

    /// The maximum squared reprojection error across the four corners, in
    /// pixels. `None` when any corner lands behind the camera, which rejects
    /// the candidate outright.
    fn max_squared_pixel_error(&self, pose: &WorldToCamera, quad: &Quadrilateral) -> Option<f64> {
        let intrinsics = self.intrinsics?;
        let corners = quad.corners();
        let mut worst = 0.0f64;
        for (corner, world) in corners.iter().zip(&self.fiducial) {
            let camera = pose.transform(world.to_homogeneous().into());
            let bearing = camera.bearing_unnormalized();
            if bearing.z <= 0.0 {
                return None;
            }
            let projection = NormalizedKeyPoint((bearing.xy() / bearing.z).into());
            let pixel = intrinsics.uncalibrate(projection);
            worst = worst.max((pixel.0 - corner).norm_squared());
        }
        Some(worst)
    }
}

impl Default for QuadPoseEstimator {
    fn default() -> Self {
        Self {
            epnp_fallback_threshold: 2.0,
            enlarge_correction: true,
            enlarge_factor: 4.0,
            enlarge_fudge: 0.5,
            small_quad_side: 60.0,
            p3p: GrunertP3P::new(),
            epnp: Epnp::new(),
            intrinsics: None,
            fiducial: [
                Point3::new(-0.5, 0.5, 0.0),
                Point3::new(0.5, 0.5, 0.0),
                Point3::new(0.5, -0.5, 0.0),
                Point3::new(-0.5, -0.5, 0.0),
            ],
            best: None,
        }
    }
}
