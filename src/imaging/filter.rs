//! Separable smoothing and first-order derivative filters.
//!
//! Borders are handled by reflection without repeating the edge pixel
//! (`gfedcb|abcdefgh|gfedcba`).

use super::raster::Raster;

/// Reflect an out-of-range index back into `[0, len)`.
#[inline]
fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

/// Normalized 1D Gaussian kernel of odd length `size`.
///
/// The standard deviation follows the usual size-derived default
/// `0.3·((size−1)/2 − 1) + 0.8`.
pub fn gaussian_kernel(size: usize) -> Vec<f64> {
    let size = size.max(1) | 1;
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as isize;
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn convolve_rows(src: &Raster, kernel: &[f64]) -> Raster {
    let half = (kernel.len() / 2) as isize;
    Raster::from_fn(src.nrows(), src.ncols(), |r, c| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let cc = reflect_101(c as isize + k as isize - half, src.ncols());
                w * src[(r, cc)] as f64
            })
            .sum::<f64>() as f32
    })
}

fn convolve_cols(src: &Raster, kernel: &[f64]) -> Raster {
    let half = (kernel.len() / 2) as isize;
    Raster::from_fn(src.nrows(), src.ncols(), |r, c| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let rr = reflect_101(r as isize + k as isize - half, src.nrows());
                w * src[(rr, c)] as f64
            })
            .sum::<f64>() as f32
    })
}

/// Gaussian smoothing with a `size × size` kernel; sizes below 3 are a no-op.
pub fn gaussian_blur(src: &Raster, size: usize) -> Raster {
    if size < 3 || src.is_empty() {
        return src.clone();
    }
    let kernel = gaussian_kernel(size);
    convolve_cols(&convolve_rows(src, &kernel), &kernel)
}

/// Central-difference gradients `(∂/∂x, ∂/∂y)` with kernel `[-0.5, 0, 0.5]`.
pub fn gradients(src: &Raster) -> (Raster, Raster) {
    if src.is_empty() {
        return (src.clone(), src.clone());
    }
    let kernel = [-0.5, 0.0, 0.5];
    (convolve_rows(src, &kernel), convolve_cols(src, &kernel))
}
