//! Georeferenced radar map: fuses scans into the tile store and renders
//! arbitrary views of it.

use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MapError, Result};
use crate::geometry::affine;
use crate::geometry::attitude::Attitude;
use crate::geometry::frames::{self, Frame};
use crate::imaging::raster::{Raster, UNKNOWN};
use crate::imaging::warp;
use crate::scan::Scan;

use super::file::MapAttributes;
use super::fusion::{self, Region};
use super::tile_store::{PartialMap, TileStore};

/// Map creation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Tile edge length in pixels.
    pub chunk_size: usize,
    /// Variance given to every freshly fused pixel.
    pub default_variance: f32,
    /// Directory receiving timestamped map files.
    pub maps_dir: PathBuf,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            default_variance: 10.0,
            maps_dir: PathBuf::from("maps"),
        }
    }
}

/// File name for a map created now: `map_YYYYMMDD_HHMM.bin`.
pub fn timestamped_name() -> String {
    format!("map_{}.bin", chrono::Local::now().format("%Y%m%d_%H%M"))
}

/// Persistent map anchored at the pose of its first scan.
#[derive(Debug, Clone)]
pub struct RadarMap {
    store: TileStore,
    default_variance: f32,
}

impl RadarMap {
    /// Create a map at `path` anchored on `first_scan` and fuse it.
    pub fn create(path: impl Into<PathBuf>, first_scan: &Scan, config: &MapConfig) -> Result<Self> {
        let default_variance = checked_variance(config.default_variance)?;
        let attributes = MapAttributes::new(
            first_scan.resolution(),
            first_scan.position(),
            first_scan.attitude(),
        );
        let store = TileStore::create(path, attributes, config.chunk_size)?;
        info!(
            path = %store.path().display(),
            resolution = first_scan.resolution(),
            chunk_size = config.chunk_size,
            "created map"
        );
        let map = Self {
            store,
            default_variance,
        };
        map.add_scan(first_scan)?;
        Ok(map)
    }

    /// Create a timestamped map inside `config.maps_dir`.
    pub fn create_in_maps_dir(first_scan: &Scan, config: &MapConfig) -> Result<Self> {
        Self::create(config.maps_dir.join(timestamped_name()), first_scan, config)
    }

    /// Load a map written earlier. Chunk size and anchor come from the file.
    pub fn open(path: impl Into<PathBuf>, config: &MapConfig) -> Result<Self> {
        let default_variance = checked_variance(config.default_variance)?;
        let store = TileStore::open(path)?;
        debug!(path = %store.path().display(), "opened map");
        Ok(Self {
            store,
            default_variance,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn resolution(&self) -> f64 {
        self.store.resolution()
    }

    pub fn anchor(&self) -> Frame {
        self.store.anchor()
    }

    pub fn default_variance(&self) -> f32 {
        self.default_variance
    }

    /// Affects only scans fused after the call. The variance must be finite
    /// and positive; on error the previous value stays.
    pub fn set_default_variance(&mut self, variance: f32) -> Result<()> {
        self.default_variance = checked_variance(variance)?;
        Ok(())
    }

    /// Fuse `scan` into the tiles its footprint touches.
    pub fn add_scan(&self, scan: &Scan) -> Result<()> {
        if scan.resolution() != self.resolution() {
            return Err(MapError::ResolutionMismatch {
                scan: scan.resolution(),
                map: self.resolution(),
            });
        }
        let anchor = self.anchor();
        let bounds = scan.footprint_bounds(&anchor);
        let mut partial = self.store.assemble(&bounds)?;

        let shape = partial.values.shape();
        let incoming = scan.predict(&partial.origin, &anchor.attitude, shape);
        let variance = self.default_variance;
        let incoming_variances = incoming.map(|v| if v.is_nan() { UNKNOWN } else { variance });

        let offset = anchor.to_local(&partial.origin).xy();
        let res = self.resolution();
        let start = (bounds.min - offset) / res;
        let end = (bounds.max - offset) / res;
        if let Some(region) = Region::covering((start.x, start.y), (end.x, end.y), shape) {
            fusion::merge_region(
                &mut partial.values,
                &mut partial.variances,
                &incoming,
                &incoming_variances,
                region,
            );
        }
        self.store.write_back(&partial)?;

        info!(
            scan = ?scan.id(),
            chunks = partial.range.row_count() * partial.range.col_count(),
            "fused scan into map"
        );
        Ok(())
    }

    /// Render the map as seen from `position`/`attitude`.
    ///
    /// Returns `(values, variances)` of `shape = (rows, cols)`; output pixels
    /// are `1/scale` map pixels wide. Pixels the map does not cover are
    /// unknown.
    pub fn extract(
        &self,
        position: &Vector3<f64>,
        attitude: &Attitude,
        shape: (usize, usize),
        scale: f64,
    ) -> Result<(Raster, Raster)> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(MapError::InvalidArgument(format!(
                "extraction scale must be positive, got {scale}"
            )));
        }
        let query_shape = (
            ((shape.0 as f64 / scale).ceil() as usize).max(1),
            ((shape.1 as f64 / scale).ceil() as usize).max(1),
        );
        let query = Scan::ones(query_shape, *position, *attitude, self.resolution())?;
        let partial = self.store.assemble(&query.footprint_bounds(&self.anchor()))?;
        Ok(self.render(&partial, &Frame::new(*position, *attitude), shape, scale))
    }

    fn render(&self, partial: &PartialMap, view: &Frame, shape: (usize, usize), scale: f64) -> (Raster, Raster) {
        let buffer = Frame::new(partial.origin, self.anchor().attitude);
        let forward = affine::scaled(
            &frames::frame_transform(&buffer, view, self.resolution()),
            scale,
        );
        (
            warp::warp_affine(&partial.values, &forward, shape, UNKNOWN),
            warp::warp_affine(&partial.variances, &forward, shape, UNKNOWN),
        )
    }
}

fn checked_variance(variance: f32) -> Result<f32> {
    if variance.is_finite() && variance > 0.0 {
        Ok(variance)
    } else {
        Err(MapError::InvalidArgument(format!(
            "default variance must be finite and positive, got {variance}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::attitude::yaw_rotation;
    use crate::imaging::raster;
    use crate::scan::ScanId;
    use approx::assert_relative_eq;

    fn config() -> MapConfig {
        MapConfig {
            chunk_size: 8,
            default_variance: 10.0,
            maps_dir: PathBuf::from("maps"),
        }
    }

    fn textured(id: u64, rows: usize, cols: usize, position: Vector3<f64>, attitude: Attitude) -> Scan {
        let img = Raster::from_fn(rows, cols, |r, c| ((r * 37 + c * 11) % 256) as f32);
        Scan::new(ScanId::new(id), img, position, attitude, 0.1).unwrap()
    }

    fn assert_matches_scan(values: &Raster, variances: &Raster, scan: &Scan, variance: f32) {
        assert_eq!(values.shape(), scan.shape());
        for ((v, p), s) in values.iter().zip(variances.iter()).zip(scan.samples().iter()) {
            assert_eq!(*v, s.round());
            assert_relative_eq!(*p, variance);
        }
    }

    #[test]
    fn test_single_scan_extracts_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 12, 20, Vector3::new(100.0, 50.0, 0.0), Attitude::identity());
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();

        let (values, variances) = map.extract(scan.position(), scan.attitude(), scan.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &scan, 10.0);
    }

    #[test]
    fn test_single_scan_extracts_unchanged_with_yawed_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 9, 13, Vector3::new(-4.0, 7.0, 1.0), yaw_rotation(0.7));
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();

        let (values, variances) = map.extract(scan.position(), scan.attitude(), scan.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &scan, 10.0);
    }

    #[test]
    fn test_refusing_same_scan_halves_variance() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 10, 10, Vector3::zeros(), yaw_rotation(-1.2));
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();
        map.add_scan(&scan).unwrap();

        let (values, variances) = map.extract(scan.position(), scan.attitude(), scan.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &scan, 5.0);
    }

    #[test]
    fn test_offset_scan_lands_in_negative_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let anchor = textured(1, 8, 8, Vector3::zeros(), Attitude::identity());
        let mut map = RadarMap::create(dir.path().join("m.bin"), &anchor, &config()).unwrap();
        map.set_default_variance(4.0).unwrap();

        // Two tiles to the left and one up, exactly on the pixel grid.
        let other = textured(2, 8, 8, Vector3::new(-1.6, -0.8, 0.0), Attitude::identity());
        map.add_scan(&other).unwrap();

        let mut coords = map.store().tile_coords().unwrap();
        coords.sort();
        assert!(coords.contains(&(-1, -2)));

        let (values, variances) = map.extract(other.position(), other.attitude(), other.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &other, 4.0);
    }

    #[test]
    fn test_values_and_variances_unknown_together() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 10, 10, Vector3::zeros(), yaw_rotation(0.3));
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();
        let rotated = textured(2, 10, 10, Vector3::new(0.3, 0.2, 0.0), yaw_rotation(0.9));
        map.add_scan(&rotated).unwrap();

        for coord in map.store().tile_coords().unwrap() {
            let (values, variances) = map.store().tile(coord).unwrap().unwrap();
            for (v, p) in values.iter().zip(variances.iter()) {
                assert_eq!(v.is_nan(), p.is_nan());
                assert!(p.is_nan() || *p >= 0.0);
            }
        }
    }

    #[test]
    fn test_extract_with_scale_is_coarser() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 16, 16, Vector3::zeros(), Attitude::identity());
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();

        let (values, _) = map.extract(scan.position(), scan.attitude(), (8, 8), 2.0).unwrap();
        // Output pixel (col 3, row 2) samples map pixel (col 1.5, row 1).
        let expected = 0.5 * (scan.samples()[(1, 1)] + scan.samples()[(1, 2)]);
        assert_relative_eq!(values[(2, 3)], expected, epsilon = 1e-3);
        assert!(raster::known_count(&values) > 0);
    }

    #[test]
    fn test_resolution_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 8, 8, Vector3::zeros(), Attitude::identity());
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();
        let coarse = Scan::new(ScanId::new(2), scan.samples().clone(), Vector3::zeros(), Attitude::identity(), 0.2)
            .unwrap();
        assert!(matches!(map.add_scan(&coarse), Err(MapError::ResolutionMismatch { .. })));
    }

    #[test]
    fn test_reopened_map_keeps_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let scan = textured(1, 8, 8, Vector3::new(3.0, 3.0, 0.0), yaw_rotation(0.2));
        RadarMap::create(&path, &scan, &config()).unwrap();

        let map = RadarMap::open(&path, &config()).unwrap();
        let (values, variances) = map.extract(scan.position(), scan.attitude(), scan.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &scan, 10.0);
    }

    #[test]
    fn test_default_variance_must_be_positive_and_finite() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 8, 8, Vector3::zeros(), Attitude::identity());
        let mut map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();

        for bad in [-5.0, 0.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(map.set_default_variance(bad), Err(MapError::InvalidArgument(_))));
        }
        assert_eq!(map.default_variance(), 10.0);

        // Fusing again after the rejected updates still uses 10 and halves it.
        map.add_scan(&scan).unwrap();
        let (values, variances) = map.extract(scan.position(), scan.attitude(), scan.shape(), 1.0).unwrap();
        assert_matches_scan(&values, &variances, &scan, 5.0);
    }

    #[test]
    fn test_create_and_open_reject_bad_default_variance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let scan = textured(1, 8, 8, Vector3::zeros(), Attitude::identity());
        let zero = MapConfig {
            default_variance: 0.0,
            ..config()
        };

        assert!(matches!(RadarMap::create(&path, &scan, &zero), Err(MapError::InvalidArgument(_))));
        assert!(!path.exists());

        RadarMap::create(&path, &scan, &config()).unwrap();
        assert!(matches!(RadarMap::open(&path, &zero), Err(MapError::InvalidArgument(_))));
    }

    #[test]
    fn test_extract_rejects_bad_scale() {
        let dir = tempfile::tempdir().unwrap();
        let scan = textured(1, 8, 8, Vector3::zeros(), Attitude::identity());
        let map = RadarMap::create(dir.path().join("m.bin"), &scan, &config()).unwrap();
        for scale in [0.0, -1.0, f64::NAN] {
            let result = map.extract(scan.position(), scan.attitude(), (4, 4), scale);
            assert!(matches!(result, Err(MapError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_timestamped_name_format() {
        let name = timestamped_name();
        assert!(name.starts_with("map_") && name.ends_with(".bin"));
        assert_eq!(name.len(), "map_YYYYMMDD_HHMM.bin".len());
    }
}
