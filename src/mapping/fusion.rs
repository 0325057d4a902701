//! Variance-weighted fusion of two independent per-pixel estimates.
//!
//! For known `(v1, p1)` and `(v2, p2)`:
//!
//! ```text
//! v = round((v1·p2 + v2·p1) / (p1 + p2))
//! p = p1·p2 / (p1 + p2)
//! ```
//!
//! An unknown operand leaves the other untouched.

use crate::imaging::raster::Raster;

/// Fuse one pixel. Returns `(value, variance)`.
#[inline]
pub fn fuse(existing: (f32, f32), incoming: (f32, f32)) -> (f32, f32) {
    let (v1, p1) = existing;
    let (v2, p2) = incoming;
    if v1.is_nan() {
        return incoming;
    }
    if v2.is_nan() {
        return existing;
    }
    let (v1, p1, v2, p2) = (v1 as f64, p1 as f64, v2 as f64, p2 as f64);
    let sum = p1 + p2;
    (
        ((v1 * p2 + v2 * p1) / sum).round() as f32,
        (p1 * p2 / sum) as f32,
    )
}

/// Pixel rectangle `rows × cols`, both ranges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub rows: (usize, usize),
    pub cols: (usize, usize),
}

impl Region {
    /// Inclusive pixel rectangle covering the fractional span
    /// `[start, end]` (in `(x, y)` pixels), clipped to a `shape` buffer.
    /// `None` if nothing of it lies inside.
    pub fn covering(start: (f64, f64), end: (f64, f64), shape: (usize, usize)) -> Option<Self> {
        let (rows, cols) = shape;
        let clip = |lo: f64, hi: f64, len: usize| -> Option<(usize, usize)> {
            if len == 0 || !lo.is_finite() || !hi.is_finite() {
                return None;
            }
            let lo = lo.floor().max(0.0);
            let hi = hi.ceil().min(len as f64 - 1.0);
            (lo <= hi).then(|| (lo as usize, hi as usize))
        };
        Some(Self {
            cols: clip(start.0, end.0, cols)?,
            rows: clip(start.1, end.1, rows)?,
        })
    }
}

/// Fuse `incoming` into `values`/`variances` over `region`; pixels outside it
/// are left untouched.
pub fn merge_region(
    values: &mut Raster,
    variances: &mut Raster,
    incoming_values: &Raster,
    incoming_variances: &Raster,
    region: Region,
) {
    for r in region.rows.0..=region.rows.1 {
        for c in region.cols.0..=region.cols.1 {
            let (v, p) = fuse(
                (values[(r, c)], variances[(r, c)]),
                (incoming_values[(r, c)], incoming_variances[(r, c)]),
            );
            values[(r, c)] = v;
            variances[(r, c)] = p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_pixel(rng: &mut StdRng) -> (f32, f32) {
        (rng.gen_range(0..=255) as f32, rng.gen_range(0.1f32..50.0))
    }

    #[test]
    fn test_unknown_operand_is_identity() {
        let known = (120.0, 3.5);
        let unknown = (f32::NAN, f32::NAN);
        assert_eq!(fuse(unknown, known), known);
        assert_eq!(fuse(known, unknown), known);
        assert!(fuse(unknown, unknown).0.is_nan());
    }

    #[test]
    fn test_self_fusion_halves_variance() {
        let (v, p) = fuse((77.0, 10.0), (77.0, 10.0));
        assert_eq!(v, 77.0);
        assert_relative_eq!(p, 5.0);
    }

    #[test]
    fn test_weights_favor_lower_variance() {
        // (100·9 + 200·1) / 10 = 110
        let (v, p) = fuse((100.0, 1.0), (200.0, 9.0));
        assert_eq!(v, 110.0);
        assert_relative_eq!(p, 0.9);
    }

    #[test]
    fn test_fusion_properties_random() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let a = random_pixel(&mut rng);
            let b = random_pixel(&mut rng);

            let ab = fuse(a, b);
            let ba = fuse(b, a);
            assert_eq!(ab.0, ba.0);
            assert_relative_eq!(ab.1, ba.1, max_relative = 1e-6);

            assert!(ab.1 < a.1.min(b.1));
            assert!(ab.0 >= a.0.min(b.0) && ab.0 <= a.0.max(b.0));
        }
    }

    #[test]
    fn test_region_covering_is_inclusive_and_clipped() {
        let region = Region::covering((1.2, -3.0), (4.5, 2.0), (10, 4)).unwrap();
        assert_eq!(region.cols, (1, 3));
        assert_eq!(region.rows, (0, 2));

        assert!(Region::covering((5.0, 0.0), (8.0, 1.0), (3, 4)).is_none());
    }

    #[test]
    fn test_merge_region_leaves_outside_untouched() {
        let mut values = Raster::from_element(3, 3, f32::NAN);
        let mut variances = values.clone();
        values[(0, 0)] = 50.0;
        variances[(0, 0)] = 2.0;

        let incoming = Raster::from_element(3, 3, 100.0);
        let incoming_var = Raster::from_element(3, 3, 2.0);
        let region = Region {
            rows: (0, 1),
            cols: (0, 1),
        };
        merge_region(&mut values, &mut variances, &incoming, &incoming_var, region);

        assert_eq!(values[(0, 0)], 75.0);
        assert_relative_eq!(variances[(0, 0)], 1.0);
        assert_eq!(values[(1, 1)], 100.0);
        assert!(values[(2, 2)].is_nan());
        assert!(variances[(0, 2)].is_nan());
        for (v, p) in values.iter().zip(variances.iter()) {
            assert_eq!(v.is_nan(), p.is_nan());
        }
    }
}
