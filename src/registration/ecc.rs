//! Enhanced Correlation Coefficient (ECC) alignment, Euclidean motion model.
//!
//! Follows Evangelidis & Psarakis, "Parametric Image Alignment Using
//! Enhanced Correlation Coefficient Maximization" (PAMI 2008). Each
//! iteration warps the reference image with the current estimate,
//! linearizes it around the parameters `p = (θ, tx, ty)` and applies the
//! closed-form ECC update:
//!
//! ```text
//! λ  = (‖i‖² − iᵀJ H⁻¹ Jᵀi) / (tᵀi − tᵀJ H⁻¹ Jᵀi)
//! Δp = H⁻¹ Jᵀ (λ·t − i)
//! ```
//!
//! where `t` and `i` are the zero-mean template and warped image restricted
//! to pixels whose warped position stays inside the reference image.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RegistrationFailure;
use crate::geometry::affine::{self, Affine2};
use crate::imaging::raster::{self, Raster};
use crate::imaging::{filter, warp};

use super::ImageRegistration;

/// Termination and pre-smoothing settings for the ECC aligner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EccConfig {
    /// Hard cap on iterations.
    pub max_iterations: usize,
    /// Stop once the correlation coefficient changes by less than this.
    pub epsilon: f64,
    /// Gaussian pre-smoothing kernel size (odd; < 3 disables smoothing).
    pub gauss_filter_size: usize,
}

impl Default for EccConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            epsilon: 1e-9,
            gauss_filter_size: 5,
        }
    }
}

/// ECC image aligner (Euclidean motion).
#[derive(Debug, Clone, Default)]
pub struct EccAligner {
    config: EccConfig,
}

/// Per-pixel terms of one linearization.
struct Sample {
    template: f64,
    image: f64,
    jacobian: Vector3<f64>,
}

impl EccAligner {
    pub fn new(config: EccConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EccConfig {
        &self.config
    }

    /// Warp `image` (and its gradients) by the current parameters and collect
    /// the per-pixel terms for every target pixel that lands inside it.
    fn linearize(
        template: &Raster,
        image: &Raster,
        grad_x: &Raster,
        grad_y: &Raster,
        params: &Vector3<f64>,
    ) -> Vec<Sample> {
        let (rows, cols) = template.shape();
        let max_u = (image.ncols() - 1) as f64;
        let max_v = (image.nrows() - 1) as f64;
        let warp_matrix = affine::euclidean(params[0], params[1], params[2]);
        let (sin, cos) = params[0].sin_cos();

        let mut samples = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let (x, y) = (c as f64, r as f64);
                let (u, v) = affine::transform_point(&warp_matrix, x, y);
                if !(0.0..=max_u).contains(&u) || !(0.0..=max_v).contains(&v) {
                    continue;
                }
                let gx = warp::sample_bilinear(grad_x, u, v, 0.0) as f64;
                let gy = warp::sample_bilinear(grad_y, u, v, 0.0) as f64;
                let d_theta = gx * (-x * sin - y * cos) + gy * (x * cos - y * sin);
                samples.push(Sample {
                    template: template[(r, c)] as f64,
                    image: warp::sample_bilinear(image, u, v, 0.0) as f64,
                    jacobian: Vector3::new(d_theta, gx, gy),
                });
            }
        }
        samples
    }
}

impl ImageRegistration for EccAligner {
    fn register(
        &self,
        reference: &Raster,
        target: &Raster,
    ) -> Result<Affine2, RegistrationFailure> {
        if reference.shape() != target.shape() {
            return Err(RegistrationFailure::ShapeMismatch {
                reference: reference.shape(),
                target: target.shape(),
            });
        }
        if target.nrows() < 2 || target.ncols() < 2 {
            return Err(RegistrationFailure::Degenerate(format!(
                "image of shape {:?} is too small",
                target.shape()
            )));
        }

        let size = self.config.gauss_filter_size;
        let template = filter::gaussian_blur(&raster::nan_to_zero(target), size);
        let image = filter::gaussian_blur(&raster::nan_to_zero(reference), size);
        let (grad_x, grad_y) = filter::gradients(&image);

        let mut params = Vector3::zeros();
        let mut rho = -1.0;
        let mut last_rho = -self.config.epsilon;
        let mut iterations = 0;

        while iterations < self.config.max_iterations
            && (rho - last_rho).abs() >= self.config.epsilon
        {
            let samples = Self::linearize(&template, &image, &grad_x, &grad_y, &params);
            if samples.is_empty() {
                return Err(RegistrationFailure::NoOverlap);
            }

            let n = samples.len() as f64;
            let template_mean = samples.iter().map(|s| s.template).sum::<f64>() / n;
            let image_mean = samples.iter().map(|s| s.image).sum::<f64>() / n;

            let mut hessian = Matrix3::zeros();
            let mut image_projection = Vector3::zeros();
            let mut template_projection = Vector3::zeros();
            let mut correlation = 0.0;
            let mut image_sq = 0.0;
            let mut template_sq = 0.0;
            for s in &samples {
                let t = s.template - template_mean;
                let i = s.image - image_mean;
                hessian += s.jacobian * s.jacobian.transpose();
                image_projection += s.jacobian * i;
                template_projection += s.jacobian * t;
                correlation += t * i;
                image_sq += i * i;
                template_sq += t * t;
            }

            if image_sq <= 0.0 || template_sq <= 0.0 {
                return Err(RegistrationFailure::Degenerate(
                    "zero intensity variance over the overlap".to_string(),
                ));
            }
            let hessian_inv = hessian.try_inverse().ok_or_else(|| {
                RegistrationFailure::Degenerate("singular Hessian".to_string())
            })?;

            last_rho = rho;
            rho = correlation / (image_sq.sqrt() * template_sq.sqrt());
            if rho.is_nan() {
                return Err(RegistrationFailure::Degenerate(
                    "correlation is NaN".to_string(),
                ));
            }

            let image_projection_h = hessian_inv * image_projection;
            let lambda_n = image_sq - image_projection.dot(&image_projection_h);
            let lambda_d = correlation - template_projection.dot(&image_projection_h);
            if lambda_d <= 0.0 {
                return Err(RegistrationFailure::Diverged);
            }
            let lambda = lambda_n / lambda_d;

            let error_projection = template_projection * lambda - image_projection;
            params += hessian_inv * error_projection;
            iterations += 1;
        }

        debug!(
            iterations,
            rho,
            theta = params[0],
            tx = params[1],
            ty = params[2],
            "ECC alignment finished"
        );

        Ok(affine::euclidean(params[0], params[1], params[2]))
    }
}
