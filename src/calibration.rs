//! Calibration point management and edge extension
//!
//! The operator clicks the corners of a planar region in a fixed order. The
//! two lateral edges of that quadrilateral are then extended down to the
//! bottom row of the image, which yields the source quadrilateral used for
//! rectification.

use serde::Serialize;
use std::fmt;

use crate::config::Point;
use crate::error::GeometryError;

/// Corner labels in click order
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Corner {
    pub const ORDER: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];

    /// Instruction for clicking this corner
    pub fn prompt(&self) -> &'static str {
        match self {
            Corner::TopLeft => "Click top left point",
            Corner::TopRight => "Now click top right point (same distance from camera)",
            Corner::BottomRight => "Now click bottom right point",
            Corner::BottomLeft => {
                "Now click bottom left point (same distance from camera as bottom right)"
            }
        }
    }
}

/// Lateral edge of the clicked quadrilateral
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Up to four clicked points in top-left, top-right, bottom-right,
/// bottom-left order
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ClickedQuadrilateral {
    points: Vec<Point>,
}

impl ClickedQuadrilateral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == 4
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Corner the next click will define, if any
    pub fn next_corner(&self) -> Option<Corner> {
        Corner::ORDER.get(self.points.len()).copied()
    }

    /// Append a point. Returns false once four points are present.
    pub fn push(&mut self, point: Point) -> bool {
        if self.is_complete() {
            return false;
        }
        self.points.push(point);
        true
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// The four corners that would result from adding `point` as the last one
    pub fn corners_with(&self, point: Point) -> Option<[Point; 4]> {
        match self.points.as_slice() {
            [tl, tr, br] => Some([*tl, *tr, *br, point]),
            _ => None,
        }
    }
}

/// Source region for rectification: the clicked top corners followed by the
/// bottom-right and bottom-left intersections with the bottom row
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(transparent)]
pub struct SourceQuadrilateral {
    corners: [Point; 4],
}

impl SourceQuadrilateral {
    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    pub fn to_array(&self) -> [[f64; 2]; 4] {
        self.corners.map(|p| [p.x, p.y])
    }

    pub fn as_tuples(&self) -> [(f64, f64); 4] {
        self.corners.map(|p| (p.x, p.y))
    }

    /// Render as an array literal that can be pasted into a downstream script
    pub fn to_literal(&self) -> String {
        let mut out = String::from("SOURCE = np.array([\n");
        for p in &self.corners {
            out.push_str(&format!("    [{:?}, {:?}],\n", p.x, p.y));
        }
        out.push_str("])");
        out
    }
}

/// Solve for the x coordinate where the line through `from` and `to` crosses
/// the row `target_y`.
fn extrapolate_x(from: Point, to: Point, target_y: f64, side: Side) -> Result<f64, GeometryError> {
    let dy = to.y - from.y;
    if dy == 0.0 {
        return Err(GeometryError::DegenerateEdge(side));
    }
    // dx / dy is the inverse slope, exact for vertical edges
    let x = from.x + (target_y - from.y) * (to.x - from.x) / dy;
    if !x.is_finite() {
        return Err(GeometryError::NonFinite(side));
    }
    Ok(x)
}

/// Extend the left (top-left to bottom-left) and right (top-right to
/// bottom-right) edges down to `y = image_height`.
pub fn extend_to_bottom(
    clicked: &[Point; 4],
    image_height: u32,
) -> Result<SourceQuadrilateral, GeometryError> {
    let [top_left, top_right, bottom_right, bottom_left] = *clicked;
    let bottom_y = image_height as f64;

    let left_x = extrapolate_x(top_left, bottom_left, bottom_y, Side::Left)?;
    let right_x = extrapolate_x(top_right, bottom_right, bottom_y, Side::Right)?;

    let lowest_top = top_left.y.max(top_right.y);
    if bottom_left.y <= lowest_top || bottom_right.y <= lowest_top {
        tracing::warn!(
            "Bottom points are not below the top points, the rectified view may be flipped"
        );
    }

    Ok(SourceQuadrilateral {
        corners: [
            top_left,
            top_right,
            Point::new(right_x, bottom_y),
            Point::new(left_x, bottom_y),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(points: [(f64, f64); 4]) -> [Point; 4] {
        points.map(Point::from)
    }

    #[test]
    fn test_vertical_edge_keeps_x() {
        let clicked = quad([(0.0, 0.0), (30.0, 0.0), (30.0, 10.0), (0.0, 10.0)]);
        let source = extend_to_bottom(&clicked, 20).unwrap();
        assert_eq!(source.bottom_left(), Point::new(0.0, 20.0));
        assert_eq!(source.bottom_right(), Point::new(30.0, 20.0));
    }

    #[test]
    fn test_diagonal_edge() {
        let clicked = quad([(0.0, 0.0), (40.0, 0.0), (30.0, 10.0), (10.0, 10.0)]);
        let source = extend_to_bottom(&clicked, 20).unwrap();
        assert_eq!(source.bottom_left().x, 20.0);
        assert_eq!(source.bottom_right().x, 20.0);
    }

    #[test]
    fn test_bottom_row_is_image_height() {
        let clicked = quad([(112.0, 40.0), (251.0, 37.0), (303.0, 188.0), (57.0, 201.0)]);
        let source = extend_to_bottom(&clicked, 480).unwrap();
        assert_eq!(source.bottom_right().y, 480.0);
        assert_eq!(source.bottom_left().y, 480.0);
        assert_eq!(source.top_left(), clicked[0]);
        assert_eq!(source.top_right(), clicked[1]);
    }

    #[test]
    fn test_matches_slope_form() {
        let clicked = quad([(100.0, 50.0), (200.0, 50.0), (260.0, 150.0), (70.0, 140.0)]);
        let source = extend_to_bottom(&clicked, 300).unwrap();

        let left_slope = (140.0 - 50.0) / (70.0 - 100.0);
        let expected_left = 100.0 + (300.0 - 50.0) / left_slope;
        assert!((source.bottom_left().x - expected_left).abs() < 1e-9);

        let right_slope = (150.0 - 50.0) / (260.0 - 200.0);
        let expected_right = 200.0 + (300.0 - 50.0) / right_slope;
        assert!((source.bottom_right().x - expected_right).abs() < 1e-9);
    }

    #[test]
    fn test_horizontal_edge_is_rejected() {
        let clicked = quad([(0.0, 10.0), (30.0, 0.0), (30.0, 10.0), (20.0, 10.0)]);
        assert_eq!(
            extend_to_bottom(&clicked, 20),
            Err(GeometryError::DegenerateEdge(Side::Left))
        );

        let clicked = quad([(0.0, 0.0), (30.0, 5.0), (40.0, 5.0), (0.0, 10.0)]);
        assert_eq!(
            extend_to_bottom(&clicked, 20),
            Err(GeometryError::DegenerateEdge(Side::Right))
        );
    }

    #[test]
    fn test_overflowing_extension_is_rejected() {
        let far = f64::MAX / 2.0;
        let clicked = quad([(0.0, 0.0), (30.0, 0.0), (30.0, 10.0), (far, 1.0)]);
        assert_eq!(
            extend_to_bottom(&clicked, 100),
            Err(GeometryError::NonFinite(Side::Left))
        );

        let clicked = quad([(0.0, 0.0), (30.0, 0.0), (far, 1.0), (0.0, 10.0)]);
        assert_eq!(
            extend_to_bottom(&clicked, 100),
            Err(GeometryError::NonFinite(Side::Right))
        );
    }

    #[test]
    fn test_clicked_quadrilateral_caps_at_four() {
        let mut clicked = ClickedQuadrilateral::new();
        assert_eq!(clicked.next_corner(), Some(Corner::TopLeft));
        for i in 0..4 {
            assert!(clicked.push(Point::new(i as f64, i as f64)));
        }
        assert!(clicked.is_complete());
        assert_eq!(clicked.next_corner(), None);
        assert!(!clicked.push(Point::new(9.0, 9.0)));
        assert_eq!(clicked.len(), 4);

        clicked.clear();
        assert!(clicked.is_empty());
        assert!(clicked.corners_with(Point::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn test_literal_format() {
        let clicked = quad([(1.0, 2.0), (3.0, 2.0), (4.0, 6.0), (0.0, 6.0)]);
        let source = extend_to_bottom(&clicked, 10).unwrap();
        let literal = source.to_literal();
        assert!(literal.starts_with("SOURCE = np.array([\n"));
        assert!(literal.contains("    [1.0, 2.0],\n"));
        assert!(literal.ends_with("])"));
        assert_eq!(literal.lines().count(), 6);
    }
}
