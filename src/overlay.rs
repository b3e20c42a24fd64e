//! Drawing calibration markers and edges onto the canvas

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::config::{OverlayConfig, Point};

/// Clicked points and the clicked quadrilateral
pub const POINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Lateral edges extended to the bottom row
pub const EXTENSION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Pen used for all overlays of one session
#[derive(Debug, Clone, Copy)]
pub struct Pen {
    pub marker_radius: i32,
    pub thickness: u32,
}

impl From<&OverlayConfig> for Pen {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            marker_radius: config.marker_radius,
            thickness: config.line_thickness.max(1),
        }
    }
}

impl Pen {
    /// Filled marker centred on a clicked point
    pub fn marker(&self, image: &mut RgbImage, at: Point, color: Rgb<u8>) {
        let (x, y) = at.to_pixel();
        draw_filled_circle_mut(image, (x as i32, y as i32), self.marker_radius, color);
    }

    /// Line segment of the pen's thickness, clipped to the image
    pub fn segment(&self, image: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>) {
        // Rasterizing costs one step per pixel of length, visible or not
        let margin = self.thickness as f64 + 1.0;
        let bounds = (
            -margin,
            -margin,
            image.width() as f64 + margin,
            image.height() as f64 + margin,
        );
        let Some((from, to)) = clip_segment(from, to, bounds) else {
            return;
        };

        let (dx, dy) = (to.x - from.x, to.y - from.y);
        let len = (dx * dx + dy * dy).sqrt();
        // Unit normal, used to offset parallel strokes
        let (nx, ny) = if len > 0.0 { (-dy / len, dx / len) } else { (0.0, 0.0) };

        let half = (self.thickness as f64 - 1.0) / 2.0;
        for i in 0..self.thickness {
            let offset = i as f64 - half;
            let (ox, oy) = (nx * offset, ny * offset);
            draw_line_segment_mut(
                image,
                ((from.x + ox) as f32, (from.y + oy) as f32),
                ((to.x + ox) as f32, (to.y + oy) as f32),
                color,
            );
        }
    }

    /// Segments between consecutive points, optionally closing the shape
    pub fn polyline(&self, image: &mut RgbImage, points: &[Point], closed: bool, color: Rgb<u8>) {
        for pair in points.windows(2) {
            self.segment(image, pair[0], pair[1], color);
        }
        if closed && points.len() > 2 {
            self.segment(image, points[points.len() - 1], points[0], color);
        }
    }
}

/// Liang-Barsky clip of `from`-`to` against `(min_x, min_y, max_x, max_y)`
fn clip_segment(from: Point, to: Point, bounds: (f64, f64, f64, f64)) -> Option<(Point, Point)> {
    if !from.is_finite() || !to.is_finite() {
        return None;
    }
    let (min_x, min_y, max_x, max_y) = bounds;
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    if !dx.is_finite() || !dy.is_finite() {
        return None;
    }
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);

    for (p, q) in [
        (-dx, from.x - min_x),
        (dx, max_x - from.x),
        (-dy, from.y - min_y),
        (dy, max_y - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }

    let at = |t: f64| Point::new(from.x + t * dx, from.y + t * dy);
    Some((at(t0), at(t1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pen() -> Pen {
        Pen::from(&OverlayConfig::default())
    }

    #[test]
    fn test_marker_draws_at_point() {
        let mut image = RgbImage::new(20, 20);
        pen().marker(&mut image, Point::new(10.0, 10.0), POINT_COLOR);
        assert_eq!(*image.get_pixel(10, 10), POINT_COLOR);
        assert_eq!(*image.get_pixel(12, 10), POINT_COLOR);
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_segment_has_thickness() {
        let mut image = RgbImage::new(20, 20);
        pen().segment(&mut image, Point::new(2.0, 10.0), Point::new(17.0, 10.0), EXTENSION_COLOR);

        let column: Vec<u32> = (0..20)
            .filter(|&y| *image.get_pixel(8, y) == EXTENSION_COLOR)
            .collect();
        assert_eq!(column.len(), 2);
    }

    #[test]
    fn test_segment_clips_outside_image() {
        let mut image = RgbImage::new(10, 10);
        pen().segment(&mut image, Point::new(5.0, 0.0), Point::new(5.0, 40.0), POINT_COLOR);
        assert_eq!(*image.get_pixel(5, 9), POINT_COLOR);
    }

    #[test]
    fn test_far_endpoint_is_clipped() {
        let mut image = RgbImage::new(120, 100);
        let from = Point::new(10.0, 20.0);
        let to = Point::new(8.0e9, 100.0);
        pen().segment(&mut image, from, to, EXTENSION_COLOR);
        assert_eq!(*image.get_pixel(60, 20), EXTENSION_COLOR);
        assert_eq!(*image.get_pixel(60, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_clip_segment() {
        let bounds = (0.0, 0.0, 10.0, 10.0);
        let (a, b) = clip_segment(Point::new(-10.0, 5.0), Point::new(30.0, 5.0), bounds).unwrap();
        assert_eq!((a.x, a.y), (0.0, 5.0));
        assert_eq!((b.x, b.y), (10.0, 5.0));

        assert!(clip_segment(Point::new(-5.0, -5.0), Point::new(-1.0, 20.0), bounds).is_none());
        assert!(clip_segment(Point::new(1.0, 1.0), Point::new(f64::NAN, 1.0), bounds).is_none());
    }

    #[test]
    fn test_closed_polyline() {
        let mut image = RgbImage::new(20, 20);
        let points = [
            Point::new(2.0, 2.0),
            Point::new(17.0, 2.0),
            Point::new(17.0, 17.0),
            Point::new(2.0, 17.0),
        ];
        pen().polyline(&mut image, &points, true, POINT_COLOR);
        // Closing edge runs down the left side
        assert!((3..17).any(|y| *image.get_pixel(2, y) == POINT_COLOR));
    }
}
