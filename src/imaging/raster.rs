//! Raster grids of scalar samples with NaN as the "unknown" sentinel.
//!
//! Rasters are indexed `(row, col)`; `row` follows the local +Y (backward)
//! axis and `col` the local +X (right) axis.

use nalgebra::DMatrix;

/// 2D grid of intensities or variances; NaN marks an unknown pixel.
pub type Raster = DMatrix<f32>;

/// Sentinel for pixels with no information.
pub const UNKNOWN: f32 = f32::NAN;

/// A `rows × cols` raster with every pixel unknown.
#[inline]
pub fn unknown(rows: usize, cols: usize) -> Raster {
    Raster::from_element(rows, cols, UNKNOWN)
}

#[inline]
pub fn is_unknown(v: f32) -> bool {
    v.is_nan()
}

/// Copy of `raster` with unknown pixels replaced by zero.
pub fn nan_to_zero(raster: &Raster) -> Raster {
    raster.map(|v| if v.is_nan() { 0.0 } else { v })
}

/// Number of known pixels.
pub fn known_count(raster: &Raster) -> usize {
    raster.iter().filter(|v| !v.is_nan()).count()
}

/// Flatten in row-major order (the on-disk tile layout).
pub fn to_row_major(raster: &Raster) -> Vec<f32> {
    raster.transpose().as_slice().to_vec()
}

/// Rebuild from row-major data; `None` if the length does not match.
pub fn from_row_major(rows: usize, cols: usize, data: &[f32]) -> Option<Raster> {
    (data.len() == rows * cols).then(|| Raster::from_row_slice(rows, cols, data))
}

/// Bit-for-bit equality, treating identical NaN payloads as equal.
pub fn bitwise_eq(a: &Raster, b: &Raster) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// 8-bit grayscale bytes, row-major; unknown pixels become black.
pub fn to_gray_bytes(raster: &Raster) -> Vec<u8> {
    to_row_major(raster)
        .into_iter()
        .map(|v| if v.is_nan() { 0 } else { v.round().clamp(0.0, 255.0) as u8 })
        .collect()
}
