//! Affine resampling with bilinear interpolation and constant borders.
//!
//! Source coordinates are quantized to 1/[`SUBPIXEL_STEPS`] of a pixel before
//! interpolation, so round-off in a transform built from rotations does not
//! leak neighbour weights into an otherwise exact grid mapping. Taps with a
//! zero weight are skipped, which keeps unknown neighbours from poisoning a
//! sample they do not contribute to.

use crate::geometry::affine::{self, Affine2};

use super::raster::Raster;

/// Sub-pixel positions per pixel used by the interpolator.
pub const SUBPIXEL_STEPS: f64 = 32.0;

/// Resample `src` into a `shape = (rows, cols)` raster, where `forward` maps
/// source pixels onto destination pixels. Pixels reading outside `src`
/// interpolate against `border`.
pub fn warp_affine(src: &Raster, forward: &Affine2, shape: (usize, usize), border: f32) -> Raster {
    match affine::invert(forward) {
        Some(inverse) => remap_affine(src, &inverse, shape, border),
        None => Raster::from_element(shape.0, shape.1, border),
    }
}

/// Resample `src` where `inverse` maps destination pixels onto source pixels.
pub fn remap_affine(src: &Raster, inverse: &Affine2, shape: (usize, usize), border: f32) -> Raster {
    let (rows, cols) = shape;
    Raster::from_fn(rows, cols, |r, c| {
        let (sx, sy) = affine::transform_point(inverse, c as f64, r as f64);
        sample_bilinear(src, quantize(sx), quantize(sy), border)
    })
}

/// Coverage mask of `src_shape` warped by `forward`: 1 where the destination
/// pixel is fully backed by source pixels, below 1 near or beyond the edges.
pub fn coverage_mask(src_shape: (usize, usize), forward: &Affine2, shape: (usize, usize)) -> Raster {
    let ones = Raster::from_element(src_shape.0, src_shape.1, 1.0);
    warp_affine(&ones, forward, shape, 0.0)
}

#[inline]
fn quantize(v: f64) -> f64 {
    (v * SUBPIXEL_STEPS).round() / SUBPIXEL_STEPS
}

/// Bilinear sample at `(x, y)` = (column, row).
pub fn sample_bilinear(src: &Raster, x: f64, y: f64, border: f32) -> f32 {
    if !x.is_finite() || !y.is_finite() {
        return border;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let mut acc = 0.0f64;
    for (dy, wy) in [(0.0, 1.0 - fy), (1.0, fy)] {
        for (dx, wx) in [(0.0, 1.0 - fx), (1.0, fx)] {
            let w = wx * wy;
            if w == 0.0 {
                continue;
            }
            acc += w * pixel_or(src, x0 + dx, y0 + dy, border) as f64;
        }
    }
    acc as f32
}

#[inline]
fn pixel_or(src: &Raster, x: f64, y: f64, border: f32) -> f32 {
    if x < 0.0 || y < 0.0 || x >= src.ncols() as f64 || y >= src.nrows() as f64 {
        border
    } else {
        src[(y as usize, x as usize)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::affine::euclidean;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn ramp(rows: usize, cols: usize) -> Raster {
        Raster::from_fn(rows, cols, |r, c| (r * cols + c) as f32)
    }

    #[test]
    fn test_identity_is_exact() {
        let src = ramp(5, 7);
        let out = warp_affine(&src, &euclidean(0.0, 0.0, 0.0), (5, 7), f32::NAN);
        assert_eq!(out, src);
    }

    #[test]
    fn test_identity_with_round_off_is_exact() {
        let src = ramp(4, 4);
        let m = euclidean(1e-13, 2.0 + 1e-12, -1e-12);
        let out = warp_affine(&src, &m, (4, 6), 0.0);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(out[(r, c + 2)], src[(r, c)]);
            }
        }
    }

    #[test]
    fn test_integer_shift_marks_uncovered_border() {
        let src = ramp(3, 3);
        let out = warp_affine(&src, &euclidean(0.0, 1.0, 0.0), (3, 3), f32::NAN);
        for r in 0..3 {
            assert!(out[(r, 0)].is_nan());
            assert_eq!(out[(r, 1)], src[(r, 0)]);
            assert_eq!(out[(r, 2)], src[(r, 1)]);
        }
    }

    #[test]
    fn test_half_pixel_interpolates() {
        let src = Raster::from_row_slice(1, 2, &[10.0, 20.0]);
        let v = sample_bilinear(&src, 0.5, 0.0, 0.0);
        assert_relative_eq!(v, 15.0);
    }

    #[test]
    fn test_coverage_mask_exact_inside() {
        let mask = coverage_mask((4, 4), &euclidean(0.0, 0.5, 0.0), (4, 5));
        assert_eq!(mask[(1, 1)], 1.0);
        // Half a pixel hangs over the left edge.
        assert_relative_eq!(mask[(1, 0)], 0.5);
        // Column 4 interpolates between the last source column and the border.
        assert_relative_eq!(mask[(1, 4)], 0.5);
    }

    #[test]
    fn test_quarter_turn_moves_pixels() {
        let src = ramp(3, 3);
        // Rotate about the origin and shift back into view.
        let m = euclidean(FRAC_PI_2, 2.0, 0.0);
        let out = warp_affine(&src, &m, (3, 3), f32::NAN);
        // Source (x=1, y=0) lands on (x=2, y=1).
        assert_eq!(out[(1, 2)], src[(0, 1)]);
        // Source (x=0, y=2) lands on (x=0, y=0).
        assert_eq!(out[(0, 0)], src[(2, 0)]);
    }

    #[test]
    fn test_unknown_neighbour_with_zero_weight_is_ignored() {
        let mut src = ramp(2, 2);
        src[(0, 1)] = f32::NAN;
        assert_eq!(sample_bilinear(&src, 0.0, 1.0, 0.0), src[(1, 0)]);
        assert!(sample_bilinear(&src, 0.5, 0.0, 0.0).is_nan());
    }
}
