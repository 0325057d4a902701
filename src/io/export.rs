//! PNG output of scans, map views and alignment previews.

use std::path::Path;

use anyhow::{Context, Result};
use image::GrayImage;

use crate::estimation::RelativePose;
use crate::imaging::raster::{self, Raster};
use crate::imaging::warp;
use crate::scan::Scan;

/// 8-bit grayscale image of a raster; unknown pixels are black.
pub fn to_gray_image(raster: &Raster) -> Result<GrayImage> {
    let (rows, cols) = raster.shape();
    GrayImage::from_raw(cols as u32, rows as u32, raster::to_gray_bytes(raster))
        .context("Raster does not fit an 8-bit image buffer")
}

pub fn save_raster_png(raster: &Raster, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    to_gray_image(raster)?
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// `reference` re-sampled through `pose` onto `shape`, for checking an
/// estimated transform against the other scan by eye.
pub fn alignment_preview(reference: &Scan, pose: &RelativePose, shape: (usize, usize)) -> Raster {
    let m = pose.to_affine(reference.resolution());
    warp::remap_affine(reference.samples(), &m, shape, 0.0)
}
