//! Geometry utilities: attitudes, frames, pixel grids, affine transforms.

pub mod affine;
pub mod attitude;
pub mod frames;

pub use affine::Affine2;
pub use attitude::Attitude;
pub use frames::{Bounds2, Frame, frame_transform, oriented_bounds, pixel_grid};
