use nalgebra::{Point2, Vector2};

/// Four ordered corner points of a detected fiducial boundary.
///
/// The corner order is part of the meaning of the value: index `i` in the
/// image corresponds to corner `i` of the physical fiducial, so rotating the
/// order (see [`Quadrilateral::rotate`]) is how a decoder communicates the
/// marker's detected orientation. The winding must stay consistent
/// (clockwise or counter-clockwise throughout); all operations here preserve
/// it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral(pub [Point2<f64>; 4]);

impl Quadrilateral {
    /// The corner points in order.
    pub fn corners(&self) -> &[Point2<f64>; 4] {
        &self.0
    }

    /// Rotates the corner order by `quarter_turns` so that what was corner
    /// `quarter_turns` becomes corner `0`.
    ///
    /// This is an index remapping; the corner coordinates themselves do not
    /// move, so winding is preserved and `rotate(a).rotate(b) ==
    /// rotate(a + b mod 4)`.
    #[must_use]
    pub fn rotate(self, quarter_turns: usize) -> Self {
        let corners = self.0;
        Self([
            corners[quarter_turns % 4],
            corners[(quarter_turns + 1) % 4],
            corners[(quarter_turns + 2) % 4],
            corners[(quarter_turns + 3) % 4],
        ])
    }

    /// The centroid of the four corners.
    pub fn centroid(&self) -> Point2<f64> {
        let sum: Vector2<f64> = self.0.iter().map(|p| p.coords).sum();
        Point2::from(sum / 4.0)
    }

    /// Scales the quadrilateral about its centroid.
    ///
    /// Used by the pose estimator's near-head-on correction, which enlarges
    /// a small quad to amplify the angular sensitivity of reprojection
    /// error.
    #[must_use]
    pub fn enlarge(self, factor: f64) -> Self {
        let centroid = self.centroid();
        Self(self.0.map(|p| centroid + (p - centroid) * factor))
    }

    /// The four side lengths, with side `i` connecting corner `i` to corner
    /// `i + 1`.
    pub fn side_lengths(&self) -> [f64; 4] {
        [
            (self.0[1] - self.0[0]).norm(),
            (self.0[2] - self.0[1]).norm(),
            (self.0[3] - self.0[2]).norm(),
            (self.0[0] - self.0[3]).norm(),
        ]
    }

    /// The shoelace signed area. Positive for counter-clockwise corner order
    /// in a y-up frame (clockwise in image coordinates with y pointing
    /// down).
    pub fn signed_area(&self) -> f64 {
        let c = &self.0;
        0.5 * (0..4)
            .map(|i| {
                let j = (i + 1) % 4;
                c[i].x * c[j].y - c[j].x * c[i].y
            })
            .sum::<f64>()
    }
}

impl From<[Point2<f64>; 4]> for Quadrilateral {
    fn from(corners: [Point2<f64>; 4]) -> Self {
        Self(corners)
    }
}
