use crate::triangulate_relative_midpoint;
use rcv_core::{Bearing, CameraToCamera, FeatureMatch, Pose, Projective};

/// Whether the match triangulates in front of both cameras under the pose.
fn cheirality(pose: CameraToCamera, a: &impl Bearing, b: &impl Bearing) -> bool {
    triangulate_relative_midpoint(pose, a, b)
        .and_then(|point_a| {
            let depth_a = point_a.point()?.z;
            let depth_b = pose.transform(point_a).point()?.z;
            Some(depth_a > 0.0 && depth_b > 0.0)
        })
        .unwrap_or(false)
}

/// Selects the pose candidate that triangulates the most matches with
/// positive depth in both cameras.
///
/// Essential matrix decomposition yields four candidate poses, only one of
/// which is physically possible for real observations; the other three place
/// the scene behind one or both cameras. Ties are broken by candidate order.
///
/// Returns `None` if no candidate triangulates any match in front of both
/// cameras.
pub fn select_pose_by_cheirality<P, I>(
    candidates: impl IntoIterator<Item = CameraToCamera>,
    matches: I,
) -> Option<CameraToCamera>
where
    P: Bearing,
    I: Iterator<Item = FeatureMatch<P>> + Clone,
{
    let mut best: Option<(CameraToCamera, usize)> = None;
    for pose in candidates {
        let in_front = matches
            .clone()
            .filter(|FeatureMatch(a, b)| cheirality(pose, a, b))
            .count();
        if in_front > best.map(|(_, count)| count).unwrap_or(0) {
            best = Some((pose, in_front));
        }
    }
    best.map(|(pose, _)| pose)
}
