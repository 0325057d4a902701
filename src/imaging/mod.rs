//! Raster images: NaN-aware grids, affine resampling and filters.

pub mod filter;
pub mod raster;
pub mod warp;

pub use raster::{Raster, UNKNOWN};
pub use warp::{coverage_mask, remap_affine, warp_affine};
