//! Image registration: estimate the rigid pixel transform between two images.
//!
//! The map pipeline only depends on the [`ImageRegistration`] trait; the
//! default implementation is the ECC aligner in [`ecc`].

pub mod ecc;

use crate::error::RegistrationFailure;
use crate::geometry::Affine2;
use crate::imaging::Raster;

pub use ecc::{EccAligner, EccConfig};

/// Registration primitive with a Euclidean (rotation + translation) model.
pub trait ImageRegistration {
    /// Find `M` such that `reference(M·x) ≈ target(x)` for target pixels `x`.
    ///
    /// Both images must share a shape. Failure to converge is reported as an
    /// error value rather than a panic.
    fn register(&self, reference: &Raster, target: &Raster)
        -> Result<Affine2, RegistrationFailure>;
}

impl<T: ImageRegistration + ?Sized> ImageRegistration for &T {
    fn register(
        &self,
        reference: &Raster,
        target: &Raster,
    ) -> Result<Affine2, RegistrationFailure> {
        (**self).register(reference, target)
    }
}
