//! Scan entity: one radar intensity image with its pose and resolution.
//!
//! A scan is built once (from sensor input, or synthetically for queries and
//! overlap masks) and never mutated afterwards; a corrected pose yields a
//! new scan through [`Scan::with_pose`].

use nalgebra::{Matrix3xX, Vector2, Vector3};

use crate::error::{MapError, Result};
use crate::geometry::affine::Affine2;
use crate::geometry::attitude::{self, Attitude};
use crate::geometry::frames::{self, Bounds2, Frame};
use crate::imaging::raster::{self, Raster, UNKNOWN};
use crate::imaging::warp;

use super::types::ScanId;

/// One georeferenced intensity image.
#[derive(Debug, Clone)]
pub struct Scan {
    id: Option<ScanId>,
    resolution: f64,
    samples: Raster,
    position: Vector3<f64>,
    attitude: Attitude,
}

impl Scan {
    /// Scan captured by the sensor.
    pub fn new(
        id: ScanId,
        samples: Raster,
        position: Vector3<f64>,
        attitude: Attitude,
        resolution: f64,
    ) -> Result<Self> {
        Self::build(Some(id), samples, position, attitude, resolution)
    }

    /// Scan without an id, used for queries and coverage masks.
    pub fn synthetic(
        samples: Raster,
        position: Vector3<f64>,
        attitude: Attitude,
        resolution: f64,
    ) -> Result<Self> {
        Self::build(None, samples, position, attitude, resolution)
    }

    /// Synthetic all-ones scan of the given `(rows, cols)` shape.
    pub fn ones(
        shape: (usize, usize),
        position: Vector3<f64>,
        attitude: Attitude,
        resolution: f64,
    ) -> Result<Self> {
        Self::synthetic(
            Raster::from_element(shape.0, shape.1, 1.0),
            position,
            attitude,
            resolution,
        )
    }

    fn build(
        id: Option<ScanId>,
        samples: Raster,
        position: Vector3<f64>,
        attitude: Attitude,
        resolution: f64,
    ) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(MapError::InvalidScan(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        if samples.is_empty() {
            return Err(MapError::InvalidScan("empty image".to_string()));
        }
        Ok(Self {
            id,
            resolution,
            samples,
            position,
            attitude,
        })
    }

    /// Same image and id placed at a different pose.
    pub fn with_pose(&self, position: Vector3<f64>, attitude: Attitude) -> Self {
        Self {
            position,
            attitude,
            ..self.clone()
        }
    }

    pub fn id(&self) -> Option<ScanId> {
        self.id
    }

    /// Meters per pixel.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn samples(&self) -> &Raster {
        &self.samples
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn attitude(&self) -> &Attitude {
        &self.attitude
    }

    /// `(rows, cols)` of the image.
    pub fn shape(&self) -> (usize, usize) {
        self.samples.shape()
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self.position, self.attitude)
    }

    /// Local x of the last pixel column, in meters.
    pub fn width_m(&self) -> f64 {
        self.resolution * (self.samples.ncols() - 1) as f64
    }

    /// Local y of the last pixel row, in meters.
    pub fn height_m(&self) -> f64 {
        self.resolution * (self.samples.nrows() - 1) as f64
    }

    /// Pixel `(col, row)` nearest to a local-frame point.
    pub fn meters_to_indices(&self, point: &Vector2<f64>) -> (i64, i64) {
        (
            (point.x / self.resolution).round() as i64,
            (point.y / self.resolution).round() as i64,
        )
    }

    /// Rotate an earth-frame vector into the local RBD frame.
    pub fn earth_to_local(&self, v: &Vector3<f64>) -> Vector3<f64> {
        attitude::apply(&self.attitude, v, false)
    }

    /// Rotate a local RBD vector into the earth frame.
    pub fn local_to_earth(&self, v: &Vector3<f64>) -> Vector3<f64> {
        attitude::apply(&self.attitude, v, true)
    }

    /// Local-frame position of every pixel centre (row-major columns).
    pub fn image_grid(&self) -> Matrix3xX<f64> {
        frames::pixel_grid(self.samples.ncols(), self.samples.nrows(), self.resolution)
    }

    /// Earth-frame position of every pixel centre (row-major columns).
    pub fn earth_grid(&self) -> Matrix3xX<f64> {
        frames::earth_grid(
            &self.frame(),
            self.samples.ncols(),
            self.samples.nrows(),
            self.resolution,
        )
    }

    /// Bounds of this scan's rotated footprint in `reference`'s local frame.
    pub fn footprint_bounds(&self, reference: &Frame) -> Bounds2 {
        frames::oriented_bounds(&self.frame(), self.width_m(), self.height_m(), reference)
    }

    /// Pixel transform from this image onto an image at `target`.
    pub fn transform_to(&self, target: &Frame) -> Affine2 {
        frames::frame_transform(&self.frame(), target, self.resolution)
    }

    /// Predicted observation of this scan's content from another pose.
    ///
    /// Output pixels not fully backed by source pixels are unknown: an
    /// all-ones mask is warped alongside and anything that does not come
    /// out as exactly 1 is discarded.
    pub fn predict(
        &self,
        target_position: &Vector3<f64>,
        target_attitude: &Attitude,
        shape: (usize, usize),
    ) -> Raster {
        let target = Frame::new(*target_position, *target_attitude);
        let forward = self.transform_to(&target);
        let mut predicted = warp::warp_affine(&self.samples, &forward, shape, 0.0);
        let mask = warp::coverage_mask(self.shape(), &forward, shape);
        predicted.zip_apply(&mask, |v, m| {
            if m != 1.0 {
                *v = UNKNOWN;
            }
        });
        predicted
    }

    /// Both images restricted to their predicted mutual coverage.
    ///
    /// Returns `(self_part, other_part)`, each in its own scan's frame,
    /// zero outside the overlap and padded to a common shape.
    pub fn overlap(&self, other: &Scan) -> Result<(Raster, Raster)> {
        if self.resolution != other.resolution {
            return Err(MapError::ResolutionMismatch {
                scan: other.resolution,
                map: self.resolution,
            });
        }
        let rows = self.samples.nrows().max(other.samples.nrows());
        let cols = self.samples.ncols().max(other.samples.ncols());

        let other_in_self = Scan::ones(other.shape(), other.position, other.attitude, other.resolution)?
            .predict(&self.position, &self.attitude, self.shape());
        let self_in_other = Scan::ones(self.shape(), self.position, self.attitude, self.resolution)?
            .predict(&other.position, &other.attitude, other.shape());

        Ok((
            masked_padded(&self.samples, &other_in_self, (rows, cols)),
            masked_padded(&other.samples, &self_in_other, (rows, cols)),
        ))
    }

    /// 8-bit grayscale copy of the image; unknown pixels are black.
    pub fn to_gray_bytes(&self) -> Vec<u8> {
        raster::to_gray_bytes(&self.samples)
    }
}

/// `samples · mask` with unknown replaced by 0, copied into a zero raster of `shape`.
fn masked_padded(samples: &Raster, mask: &Raster, shape: (usize, usize)) -> Raster {
    let mut out = Raster::zeros(shape.0, shape.1);
    for r in 0..samples.nrows() {
        for c in 0..samples.ncols() {
            let restricted = samples[(r, c)] * mask[(r, c)];
            if !restricted.is_nan() {
                out[(r, c)] = restricted;
            }
        }
    }
    out
}
