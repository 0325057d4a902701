//! Persistent chunked map: tile storage, fusion rule and orchestration.

pub mod file;
pub mod fusion;
pub mod map;
pub mod tile_store;

pub use file::{ChunkCoord, MapAttributes, MapFile, TileData};
pub use fusion::{fuse, merge_region, Region};
pub use map::{MapConfig, RadarMap};
pub use tile_store::{ChunkRange, PartialMap, TileStore};
