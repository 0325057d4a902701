//! Chunked persistent raster store.
//!
//! The map plane is cut into `chunk_size × chunk_size` tiles in the anchor's
//! local frame. Tile `(i, j)` covers local
//! `x ∈ [j·S, (j+1)·S)` and `y ∈ [i·S, (i+1)·S)` with `S = chunk_size · resolution`.
//! Tiles are materialized NaN-filled on first access and never deleted.
//!
//! Fusing a scan is one read-modify-write unit: [`TileStore::assemble`],
//! mutate the returned buffers, then [`TileStore::write_back`]. Only the
//! tiles of the range are read or written. `write_back` accepts a buffer
//! only if its origin sits on a tile corner and the tiles it spans are the
//! ones it was assembled from.

use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use tracing::debug;

use crate::error::{MapError, Result};
use crate::geometry::frames::{Bounds2, Frame};
use crate::imaging::raster::{self, Raster};

use super::file::{ChunkCoord, MapAttributes, MapFile, TileData};

/// Quotients this close to an integer are treated as lying on the boundary.
const BOUNDARY_SNAP: f64 = 1e-9;
/// Largest distance, in tiles, between a buffer origin and a tile corner.
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// Inclusive range of chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// `(first, last)` along local y.
    pub rows: (i64, i64),
    /// `(first, last)` along local x.
    pub cols: (i64, i64),
}

impl ChunkRange {
    pub fn row_count(&self) -> usize {
        (self.rows.1 - self.rows.0 + 1) as usize
    }

    pub fn col_count(&self) -> usize {
        (self.cols.1 - self.cols.0 + 1) as usize
    }

    pub fn coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        (self.rows.0..=self.rows.1).flat_map(move |i| (self.cols.0..=self.cols.1).map(move |j| (i, j)))
    }
}

/// Contiguous copy of a rectangle of tiles.
#[derive(Debug, Clone)]
pub struct PartialMap {
    pub values: Raster,
    pub variances: Raster,
    /// Earth-frame position of pixel `(0, 0)`.
    pub origin: Vector3<f64>,
    pub range: ChunkRange,
}

/// Handle on one map file.
#[derive(Debug, Clone)]
pub struct TileStore {
    path: PathBuf,
    attributes: MapAttributes,
    chunk_size: usize,
}

impl TileStore {
    /// Create an empty store at `path`, replacing any file there.
    pub fn create(path: impl Into<PathBuf>, attributes: MapAttributes, chunk_size: usize) -> Result<Self> {
        let path = path.into();
        MapFile::create(&path, attributes.clone(), chunk_size)?;
        Ok(Self {
            path,
            attributes,
            chunk_size,
        })
    }

    /// Open an existing store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = MapFile::open(&path)?;
        Ok(Self {
            attributes: file.attributes().clone(),
            chunk_size: file.chunk_size(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attributes(&self) -> &MapAttributes {
        &self.attributes
    }

    pub fn resolution(&self) -> f64 {
        self.attributes.resolution
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Anchor frame: chunk `(0, 0)` starts at its origin.
    pub fn anchor(&self) -> Frame {
        Frame::new(self.attributes.anchor_position(), self.attributes.anchor_attitude())
    }

    /// Edge length of one tile in meters.
    pub fn chunk_span(&self) -> f64 {
        self.chunk_size as f64 * self.attributes.resolution
    }

    /// Chunk index containing local coordinate `meters` along one axis.
    pub fn chunk_index(&self, meters: f64) -> i64 {
        let q = meters / self.chunk_span();
        let nearest = q.round();
        if (q - nearest).abs() < BOUNDARY_SNAP {
            nearest as i64
        } else {
            q.floor() as i64
        }
    }

    /// Smallest chunk range covering `bounds` (anchor-local meters).
    pub fn chunk_range(&self, bounds: &Bounds2) -> ChunkRange {
        ChunkRange {
            rows: (self.chunk_index(bounds.min.y), self.chunk_index(bounds.max.y)),
            cols: (self.chunk_index(bounds.min.x), self.chunk_index(bounds.max.x)),
        }
    }

    /// Earth-frame position of the first pixel of tile `(i, j)`.
    pub fn chunk_origin(&self, (i, j): ChunkCoord) -> Vector3<f64> {
        let span = self.chunk_span();
        self.anchor().to_earth(&Vector3::new(j as f64 * span, i as f64 * span, 0.0))
    }

    /// Copy the tiles covering `bounds` into one buffer, creating missing
    /// tiles as unknown.
    pub fn assemble(&self, bounds: &Bounds2) -> Result<PartialMap> {
        let range = self.chunk_range(bounds);
        let cs = self.chunk_size;
        let mut file = MapFile::open(&self.path)?;
        let coords: Vec<ChunkCoord> = range.coords().collect();
        let stored = file.read_tiles(&coords)?;

        let mut values = raster::unknown(range.row_count() * cs, range.col_count() * cs);
        let mut variances = values.clone();
        for (&(i, j), tile) in &stored {
            let r0 = (i - range.rows.0) as usize * cs;
            let c0 = (j - range.cols.0) as usize * cs;
            copy_tile_in(&mut values, &tile.values, (r0, c0), cs);
            copy_tile_in(&mut variances, &tile.variances, (r0, c0), cs);
        }

        let created: Vec<(ChunkCoord, TileData)> = coords
            .iter()
            .filter(|c| !stored.contains_key(*c))
            .map(|&c| (c, TileData::unknown(cs)))
            .collect();
        file.commit(&created)?;
        debug!(?range, created = created.len(), "assembled partial map");

        Ok(PartialMap {
            values,
            variances,
            origin: self.chunk_origin((range.rows.0, range.cols.0)),
            range,
        })
    }

    /// Overwrite every tile spanned by `partial` with its contents.
    ///
    /// The tile range is recomputed from `partial.origin` and the buffer
    /// shape, which must be whole tiles starting on a tile corner, and must
    /// equal `partial.range`.
    pub fn write_back(&self, partial: &PartialMap) -> Result<()> {
        let cs = self.chunk_size;
        let shape = partial.values.shape();
        if shape != partial.variances.shape() {
            return Err(MapError::ShapeMismatch {
                expected: shape,
                actual: partial.variances.shape(),
            });
        }
        if shape.0 == 0 || shape.1 == 0 || shape.0 % cs != 0 || shape.1 % cs != 0 {
            return Err(MapError::ShapeMismatch {
                expected: (shape.0.div_ceil(cs).max(1) * cs, shape.1.div_ceil(cs).max(1) * cs),
                actual: shape,
            });
        }

        let local = self.anchor().to_local(&partial.origin);
        let span = self.chunk_span();
        let (qx, qy) = (local.x / span, local.y / span);
        if (qx - qx.round()).abs() > ALIGNMENT_TOLERANCE || (qy - qy.round()).abs() > ALIGNMENT_TOLERANCE {
            return Err(MapError::InvalidArgument(format!(
                "buffer origin lies {qx:.6}, {qy:.6} tiles from the anchor, not on a tile corner"
            )));
        }
        let first = (qy.round() as i64, qx.round() as i64);
        let range = ChunkRange {
            rows: (first.0, first.0 + (shape.0 / cs) as i64 - 1),
            cols: (first.1, first.1 + (shape.1 / cs) as i64 - 1),
        };
        if range != partial.range {
            return Err(MapError::InvalidArgument(format!(
                "buffer spans tiles {range:?} but was assembled from {:?}",
                partial.range
            )));
        }

        let tiles: Vec<(ChunkCoord, TileData)> = range
            .coords()
            .map(|(i, j)| {
                let r0 = (i - range.rows.0) as usize * cs;
                let c0 = (j - range.cols.0) as usize * cs;
                let tile = TileData {
                    values: copy_tile_out(&partial.values, (r0, c0), cs),
                    variances: copy_tile_out(&partial.variances, (r0, c0), cs),
                };
                ((i, j), tile)
            })
            .collect();
        MapFile::open(&self.path)?.commit(&tiles)?;
        debug!(?range, "wrote back partial map");
        Ok(())
    }

    /// Values and variances of one tile, if it exists.
    pub fn tile(&self, coord: ChunkCoord) -> Result<Option<(Raster, Raster)>> {
        let cs = self.chunk_size;
        Ok(MapFile::open(&self.path)?.read_tile(coord)?.and_then(|tile| {
            raster::from_row_major(cs, cs, &tile.values).zip(raster::from_row_major(cs, cs, &tile.variances))
        }))
    }

    /// Coordinates of every materialized tile, sorted.
    pub fn tile_coords(&self) -> Result<Vec<ChunkCoord>> {
        Ok(MapFile::open(&self.path)?.coords())
    }
}

fn copy_tile_in(dst: &mut Raster, tile: &[f32], (r0, c0): (usize, usize), cs: usize) {
    for r in 0..cs {
        for c in 0..cs {
            dst[(r0 + r, c0 + c)] = tile[r * cs + c];
        }
    }
}

fn copy_tile_out(src: &Raster, (r0, c0): (usize, usize), cs: usize) -> Vec<f32> {
    raster::to_row_major(&src.view((r0, c0), (cs, cs)).into_owned())
}
