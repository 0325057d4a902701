//! Persistent memo of relative poses between identified scans.
//!
//! One JSON file holds every dataset namespace:
//!
//! ```json
//! {
//!   "active_dataset": "flight_03",
//!   "datasets": {
//!     "flight_03": { "17-18": { "translation": [..], "rotation": [..] } }
//!   }
//! }
//! ```
//!
//! The file is read on every lookup and rewritten atomically on every
//! insert, so no handle outlives a call.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MapError, Result};
use crate::io::atomic;
use crate::scan::ScanId;

use super::relative_pose::{RelativePose, StoredPose};

/// Ordered pair of scan ids: the pose of `target` relative to `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: ScanId,
    pub target: ScanId,
}

impl CacheKey {
    pub fn new(source: ScanId, target: ScanId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    active_dataset: Option<String>,
    #[serde(default)]
    datasets: BTreeMap<String, BTreeMap<String, StoredPose>>,
}

/// Handle on the pose cache file.
#[derive(Debug, Clone)]
pub struct PoseCache {
    path: PathBuf,
}

impl PoseCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make `dataset` the namespace used by subsequent lookups and inserts.
    pub fn set_active_dataset(&self, dataset: &str) -> Result<()> {
        let mut file = self.read()?;
        file.active_dataset = Some(dataset.to_string());
        file.datasets.entry(dataset.to_string()).or_default();
        self.write(&file)
    }

    pub fn active_dataset(&self) -> Result<Option<String>> {
        Ok(self.read()?.active_dataset)
    }

    /// Cached pose for `key` in the active namespace.
    pub fn get(&self, key: &CacheKey) -> Result<Option<RelativePose>> {
        let file = self.read()?;
        let dataset = active(&file)?;
        let hit = file
            .datasets
            .get(dataset)
            .and_then(|entries| entries.get(&key.to_string()))
            .map(RelativePose::from);
        debug!(dataset, %key, hit = hit.is_some(), "pose cache lookup");
        Ok(hit)
    }

    /// Store `pose` under `key` in the active namespace and commit.
    ///
    /// Non-finite poses are never stored.
    pub fn insert(&self, key: &CacheKey, pose: &RelativePose) -> Result<()> {
        if !pose.is_finite() {
            return Ok(());
        }
        let mut file = self.read()?;
        let dataset = active(&file)?.to_string();
        file.datasets
            .entry(dataset)
            .or_default()
            .insert(key.to_string(), StoredPose::from(pose));
        self.write(&file)
    }

    /// Number of entries in the active namespace.
    pub fn len(&self) -> Result<usize> {
        let file = self.read()?;
        let dataset = active(&file)?;
        Ok(file.datasets.get(dataset).map_or(0, BTreeMap::len))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<CacheFile> {
        match atomic::read_if_exists(&self.path)? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(CacheFile::default()),
        }
    }

    fn write(&self, file: &CacheFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        atomic::write_atomic(&self.path, &bytes)
    }
}

fn active(file: &CacheFile) -> Result<&str> {
    file.active_dataset
        .as_deref()
        .ok_or(MapError::InvalidCacheState)
}
