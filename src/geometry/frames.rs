//! Earth frame, local sensor frames and pixel grids.
//!
//! # Frame Conventions
//!
//! ## Earth Frame
//! Fixed frame in which scan positions are expressed (meters).
//!
//! ## Local Frame (RBD)
//! ```text
//!      +------ +X (right, image columns)
//!      |
//!      |
//!      +Y (backward, image rows)
//! ```
//! Z points down; images lie in the z = 0 plane. Pixel `(col, row)` sits at
//! local position `(col · res, row · res, 0)`.
//!
//! A [`Frame`] pairs an earth-frame origin with an [`Attitude`]:
//! ```text
//! p_local = R · (p_earth − origin)
//! p_earth = origin + R⁻¹ · p_local
//! ```

use nalgebra::{Matrix3xX, Vector2, Vector3};

use super::affine::{self, Affine2};
use super::attitude::{self, Attitude};

/// Earth-frame origin plus orientation of a local frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub position: Vector3<f64>,
    pub attitude: Attitude,
}

impl Frame {
    pub fn new(position: Vector3<f64>, attitude: Attitude) -> Self {
        Self { position, attitude }
    }

    /// Express an earth-frame point in this local frame.
    #[inline]
    pub fn to_local(&self, p_earth: &Vector3<f64>) -> Vector3<f64> {
        attitude::apply(&self.attitude, &(p_earth - self.position), false)
    }

    /// Express a local-frame point in the earth frame.
    #[inline]
    pub fn to_earth(&self, p_local: &Vector3<f64>) -> Vector3<f64> {
        self.position + attitude::apply(&self.attitude, p_local, true)
    }
}

/// Axis-aligned rectangle in a local frame (meters, x/y plane).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2 {
    pub min: Vector2<f64>,
    pub max: Vector2<f64>,
}

impl Bounds2 {
    /// Smallest rectangle enclosing all `points`.
    pub fn enclosing(points: &[Vector2<f64>]) -> Self {
        let mut min = Vector2::repeat(f64::INFINITY);
        let mut max = Vector2::repeat(f64::NEG_INFINITY);
        for p in points {
            min = min.inf(p);
            max = max.sup(p);
        }
        Self { min, max }
    }

    pub fn contains(&self, p: &Vector2<f64>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Local-frame position of every pixel centre of a `width × height` image.
///
/// Columns are ordered row-major (row 0 first). Positions range over
/// `[0, (width−1)·res] × [0, (height−1)·res]` with z = 0.
pub fn pixel_grid(width: usize, height: usize, resolution: f64) -> Matrix3xX<f64> {
    Matrix3xX::from_fn(width * height, |axis, idx| match axis {
        0 => (idx % width) as f64 * resolution,
        1 => (idx / width) as f64 * resolution,
        _ => 0.0,
    })
}

/// Earth-frame position of every pixel centre of an image placed at `frame`.
pub fn earth_grid(frame: &Frame, width: usize, height: usize, resolution: f64) -> Matrix3xX<f64> {
    let mut grid = attitude::apply_batch(&frame.attitude, &pixel_grid(width, height, resolution), true);
    for mut col in grid.column_iter_mut() {
        col += frame.position;
    }
    grid
}

/// Corners of a `width_m × height_m` footprint placed at `scan`, expressed in
/// `reference` (planar part only), in the order origin, +x, +x+y, +y.
pub fn footprint_corners(
    scan: &Frame,
    width_m: f64,
    height_m: f64,
    reference: &Frame,
) -> [Vector2<f64>; 4] {
    let rot = attitude::planar_rotation(&attitude::relative(&reference.attitude, &scan.attitude));
    let origin = reference.to_local(&scan.position).xy();
    [
        origin,
        origin + rot * Vector2::new(width_m, 0.0),
        origin + rot * Vector2::new(width_m, height_m),
        origin + rot * Vector2::new(0.0, height_m),
    ]
}

/// Axis-aligned bounds, in `reference`'s local frame, of the rotated
/// rectangle covered by a `width_m × height_m` footprint at `scan`.
pub fn oriented_bounds(scan: &Frame, width_m: f64, height_m: f64, reference: &Frame) -> Bounds2 {
    Bounds2::enclosing(&footprint_corners(scan, width_m, height_m, reference))
}

/// Pixel-space affine mapping image pixels of `from` onto image pixels of `to`.
///
/// Linear block: planar part of `R_to · R_from⁻¹`; translation:
/// `R_to · (p_from − p_to)` in pixels. Both images share `resolution`.
pub fn frame_transform(from: &Frame, to: &Frame, resolution: f64) -> Affine2 {
    let rot = attitude::planar_rotation(&attitude::relative(&to.attitude, &from.attitude));
    let shift = to.to_local(&from.position).xy() / resolution;
    affine::from_parts(&rot, &shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::attitude::yaw_rotation;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_frame_round_trip() {
        let frame = Frame::new(Vector3::new(10.0, -5.0, 2.0), yaw_rotation(0.8));
        let p = Vector3::new(12.0, -1.0, 2.0);
        assert_relative_eq!(frame.to_earth(&frame.to_local(&p)), p, epsilon = 1e-12);
    }

    #[test]
    fn test_pixel_grid_extent() {
        let grid = pixel_grid(4, 3, 0.5);
        assert_eq!(grid.ncols(), 12);
        assert_relative_eq!(grid.column(0).into_owned(), Vector3::zeros());
        assert_relative_eq!(grid.column(3).into_owned(), Vector3::new(1.5, 0.0, 0.0));
        assert_relative_eq!(grid.column(11).into_owned(), Vector3::new(1.5, 1.0, 0.0));
    }

    #[test]
    fn test_earth_grid_matches_frame() {
        let frame = Frame::new(Vector3::new(1.0, 2.0, 0.0), yaw_rotation(0.4));
        let grid = earth_grid(&frame, 3, 2, 0.1);
        let local = Vector3::new(0.2, 0.1, 0.0);
        assert_relative_eq!(grid.column(5).into_owned(), frame.to_earth(&local), epsilon = 1e-12);
    }

    #[test]
    fn test_oriented_bounds_contains_all_corners() {
        let reference = Frame::new(Vector3::new(3.0, 4.0, 0.0), yaw_rotation(0.2));
        for angle in [0.0, FRAC_PI_4, FRAC_PI_2, PI] {
            let scan = Frame::new(Vector3::new(5.0, 1.0, 0.0), yaw_rotation(0.2 + angle));
            let bounds = oriented_bounds(&scan, 2.0, 1.0, &reference);
            for corner in footprint_corners(&scan, 2.0, 1.0, &reference) {
                assert!(bounds.contains(&corner), "angle {angle}: {corner:?} outside");
            }
        }
    }

    #[test]
    fn test_oriented_bounds_quarter_turn() {
        let reference = Frame::new(Vector3::zeros(), Attitude::identity());
        let scan = Frame::new(Vector3::zeros(), yaw_rotation(-FRAC_PI_2));
        let bounds = oriented_bounds(&scan, 2.0, 1.0, &reference);

        // R_ref · R_scan⁻¹ is a +90° turn: x maps onto +y, y onto −x.
        assert_relative_eq!(bounds.min, Vector2::new(-1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(bounds.max, Vector2::new(0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_frame_transform_identity_offset() {
        let to = Frame::new(Vector3::new(1.0, 1.0, 0.0), Attitude::identity());
        let from = Frame::new(Vector3::new(1.2, 1.1, 0.0), Attitude::identity());
        let m = frame_transform(&from, &to, 0.1);
        let (x, y) = affine::transform_point(&m, 0.0, 0.0);
        assert_relative_eq!(x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_transform_maps_earth_points_consistently() {
        let res = 0.05;
        let to = Frame::new(Vector3::new(-2.0, 3.0, 0.0), yaw_rotation(0.3));
        let from = Frame::new(Vector3::new(0.5, 2.0, 0.0), yaw_rotation(1.1));
        let m = frame_transform(&from, &to, res);

        let px = Vector3::new(7.0 * res, 4.0 * res, 0.0);
        let earth = from.to_earth(&px);
        let expected = to.to_local(&earth) / res;

        let (x, y) = affine::transform_point(&m, 7.0, 4.0);
        assert_relative_eq!(x, expected.x, epsilon = 1e-9);
        assert_relative_eq!(y, expected.y, epsilon = 1e-9);
    }
}
