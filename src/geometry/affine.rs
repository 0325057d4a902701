//! 2×3 affine matrices in pixel units.
//!
//! Convention: an [`Affine2`] `M = [A | t]` maps a source pixel `(x, y)`
//! (column, row) to `A·(x, y)ᵀ + t`.

use nalgebra::{Matrix2, Matrix2x3, Vector2};

/// 2×3 affine transform (linear block + translation) in pixels.
pub type Affine2 = Matrix2x3<f64>;

/// Build an affine transform from its linear block and translation.
#[inline]
pub fn from_parts(linear: &Matrix2<f64>, translation: &Vector2<f64>) -> Affine2 {
    Affine2::new(
        linear[(0, 0)],
        linear[(0, 1)],
        translation.x,
        linear[(1, 0)],
        linear[(1, 1)],
        translation.y,
    )
}

/// Euclidean (rotation + translation) transform.
#[inline]
pub fn euclidean(theta: f64, tx: f64, ty: f64) -> Affine2 {
    let (s, c) = theta.sin_cos();
    Affine2::new(c, -s, tx, s, c, ty)
}

/// Linear 2×2 block.
#[inline]
pub fn linear(m: &Affine2) -> Matrix2<f64> {
    m.fixed_view::<2, 2>(0, 0).into_owned()
}

/// Translation column.
#[inline]
pub fn translation(m: &Affine2) -> Vector2<f64> {
    Vector2::new(m[(0, 2)], m[(1, 2)])
}

/// Apply to a point `(x, y)`.
#[inline]
pub fn transform_point(m: &Affine2, x: f64, y: f64) -> (f64, f64) {
    (
        m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
        m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
    )
}

/// Inverse transform, `None` when the linear block is singular.
pub fn invert(m: &Affine2) -> Option<Affine2> {
    let inv = linear(m).try_inverse()?;
    let t = -(inv * translation(m));
    Some(from_parts(&inv, &t))
}

/// Uniformly scale the output side of a transform (`s · M`).
#[inline]
pub fn scaled(m: &Affine2, scale: f64) -> Affine2 {
    m * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invert_euclidean() {
        let m = euclidean(0.3, 4.0, -2.0);
        let inv = invert(&m).unwrap();

        let (x, y) = transform_point(&m, 7.0, 3.0);
        let (bx, by) = transform_point(&inv, x, y);

        assert_relative_eq!(bx, 7.0, epsilon = 1e-12);
        assert_relative_eq!(by, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let m = Affine2::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(invert(&m).is_none());
    }

    #[test]
    fn test_scaled_scales_translation_too() {
        let m = euclidean(0.0, 2.0, 3.0);
        let s = scaled(&m, 2.0);
        assert_relative_eq!(translation(&s), Vector2::new(4.0, 6.0));
        assert_relative_eq!(linear(&s), Matrix2::identity() * 2.0);
    }
}
