//! Mapper configuration, loaded from YAML.
//!
//! ```yaml
//! map:
//!   chunk_size: 1000
//!   default_variance: 10.0
//!   maps_dir: maps
//! registration:
//!   max_iterations: 5000
//!   epsilon: 1.0e-9
//!   gauss_filter_size: 5
//! cache:
//!   path: transformations.json
//!   dataset: flight_03
//! dataset:
//!   resolution: 0.04
//! ```
//!
//! Every field is optional and falls back to the values above.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::mapping::MapConfig;
use crate::registration::EccConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Pose cache file.
    pub path: PathBuf,
    /// Namespace to activate; the dataset directory name when unset.
    pub dataset: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("transformations.json"),
            dataset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Meters per pixel for manifest rows without their own value.
    pub resolution: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { resolution: 0.04 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub map: MapConfig,
    pub registration: EccConfig,
    pub cache: CacheConfig,
    pub dataset: DatasetConfig,
}

impl MapperConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: MapperConfig =
            serde_yaml::from_str(text).map_err(|e| MapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MapError::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.map.chunk_size == 0 {
            return Err(MapError::Config("map.chunk_size must be positive".to_string()));
        }
        if !(self.map.default_variance.is_finite() && self.map.default_variance > 0.0) {
            return Err(MapError::Config("map.default_variance must be finite and positive".to_string()));
        }
        if !(self.dataset.resolution > 0.0) {
            return Err(MapError::Config("dataset.resolution must be positive".to_string()));
        }
        if self.registration.max_iterations == 0 {
            return Err(MapError::Config(
                "registration.max_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
