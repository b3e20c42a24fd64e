//! Perspective transformation for ground-plane rectification
//!
//! This module implements the perspective (homography) transformation that
//! maps the source quadrilateral in the camera image to an axis-aligned
//! rectangle, and the backward-mapping warp used for the preview.

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;

use crate::error::GeometryError;

/// Below this, a determinant or homogeneous weight is treated as zero
const EPSILON: f64 = 1e-10;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone)]
pub struct PerspectiveTransform {
    /// Source to destination
    matrix: Matrix3<f64>,
    /// Destination to source, used for warping
    inverse: Matrix3<f64>,
    /// Destination image dimensions
    dst_width: u32,
    dst_height: u32,
}

impl PerspectiveTransform {
    /// Compute the perspective transform from 4 source points to 4 destination
    /// points. Exactly four correspondences determine it, no least squares.
    pub fn compute(
        src: [(f64, f64); 4],
        dst: [(f64, f64); 4],
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Self, GeometryError> {
        check_not_collinear(&src)?;
        check_not_collinear(&dst)?;

        let matrix = compute_homography(&src, &dst)?;
        let inverse = matrix.try_inverse().ok_or(GeometryError::Singular)?;

        Ok(Self {
            matrix,
            inverse,
            dst_width,
            dst_height,
        })
    }

    /// Transform mapping `src` onto a `width` x `height` rectangle whose corners
    /// are taken in top-left, top-right, bottom-right, bottom-left order
    pub fn to_rectangle(src: [(f64, f64); 4], width: u32, height: u32) -> Result<Self, GeometryError> {
        let dst = rectangle_corners(width, height);
        Self::compute(src, dst, width, height)
    }

    /// Transform a point from source to destination coordinates
    #[inline]
    pub fn transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply_homography(&self.matrix, x, y)
    }

    /// Transform a point from destination to source coordinates (inverse)
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply_homography(&self.inverse, x, y)
    }

    /// Resample `src` into the destination grid by backward mapping with
    /// bilinear interpolation. Pixels mapping outside the source are black.
    pub fn warp(&self, src: &RgbImage) -> RgbImage {
        let mut out = RgbImage::new(self.dst_width, self.dst_height);
        let row_len = self.dst_width as usize * 3;
        if row_len == 0 {
            return out;
        }

        let buf: &mut [u8] = &mut out;
        buf.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(dst_y, row)| {
                for (dst_x, pixel) in row.chunks_exact_mut(3).enumerate() {
                    let sample = self
                        .inverse_transform_point(dst_x as f64, dst_y as f64)
                        .map(|(sx, sy)| bilinear_sample(src, sx, sy))
                        .unwrap_or([0, 0, 0]);
                    pixel.copy_from_slice(&sample);
                }
            });

        out
    }
}

/// Corners of a `width` x `height` pixel grid, top-left first, clockwise
pub fn rectangle_corners(width: u32, height: u32) -> [(f64, f64); 4] {
    let right = width.saturating_sub(1) as f64;
    let bottom = height.saturating_sub(1) as f64;
    [
        (0.0, 0.0),      // Top-left
        (right, 0.0),    // Top-right
        (right, bottom), // Bottom-right
        (0.0, bottom),   // Bottom-left
    ]
}

/// Reject point sets where any three points are collinear
fn check_not_collinear(points: &[(f64, f64); 4]) -> Result<(), GeometryError> {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];

    for triple in TRIPLES {
        let (ax, ay) = points[triple[0]];
        let (bx, by) = points[triple[1]];
        let (cx, cy) = points[triple[2]];
        let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
        if cross.abs() < EPSILON || !cross.is_finite() {
            return Err(GeometryError::Collinear(triple));
        }
    }
    Ok(())
}

/// Compute a 3x3 homography matrix from 4 point correspondences.
///
/// For each correspondence (x,y) -> (x',y') with h9 fixed to 1:
///   x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
///   x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
fn compute_homography(
    src: &[(f64, f64); 4],
    dst: &[(f64, f64); 4],
) -> Result<Matrix3<f64>, GeometryError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (&(x, y), &(xp, yp))) in src.iter().zip(dst.iter()).enumerate() {
        let row1 = i * 2;
        let row2 = i * 2 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    let h = a.lu().solve(&b).ok_or(GeometryError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::Singular);
    }

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Apply a homography matrix to a point
#[inline]
fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let v = h * Vector3::new(x, y, 1.0);
    let w = v[2];
    if w.abs() < EPSILON {
        return None;
    }
    Some((v[0] / w, v[1] / w))
}

/// Bilinear interpolation with a constant black border
#[inline]
fn bilinear_sample(src: &RgbImage, x: f64, y: f64) -> [u8; 3] {
    let (width, height) = (src.width() as i64, src.height() as i64);
    if !x.is_finite() || !y.is_finite() {
        return [0, 0, 0];
    }
    if x <= -1.0 || y <= -1.0 || x >= width as f64 || y >= height as f64 {
        return [0, 0, 0];
    }

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let fetch = |px: i64, py: i64| -> Rgb<u8> {
        if px < 0 || py < 0 || px >= width || py >= height {
            Rgb([0, 0, 0])
        } else {
            *src.get_pixel(px as u32, py as u32)
        }
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1, y0);
    let p01 = fetch(x0, y0 + 1);
    let p11 = fetch(x0 + 1, y0 + 1);

    let mut result = [0u8; 3];
    for (c, out) in result.iter_mut().enumerate() {
        let value = p00[c] as f64 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f64 * fx * (1.0 - fy)
            + p01[c] as f64 * (1.0 - fx) * fy
            + p11[c] as f64 * fx * fy;
        *out = value.round().clamp(0.0, 255.0) as u8;
    }

    result
}
