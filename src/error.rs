//! Error types for map construction and pose estimation.
//!
//! Two families:
//! - [`MapError`] is propagated to callers (I/O, corrupt files, precondition
//!   violations such as a resolution mismatch).
//! - [`RegistrationFailure`] is recovered locally by the pose estimator and
//!   only surfaces as the `Failed` arm of a pose estimate.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, MapError>;

/// Errors surfaced to callers of the map and estimator APIs.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("map file encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("pose cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),

    #[error("scan resolution {scan} m/px does not match map resolution {map} m/px")]
    ResolutionMismatch { scan: f64, map: f64 },

    #[error("pose cache has no active dataset namespace")]
    InvalidCacheState,

    #[error("invalid scan: {0}")]
    InvalidScan(String),

    #[error("invalid map file: {0}")]
    InvalidMapFile(String),

    #[error("buffer shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl MapError {
    /// Wrap an `std::io::Error` together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MapError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why the image-registration primitive could not produce a transform.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationFailure {
    #[error("images have no valid overlapping pixels")]
    NoOverlap,

    #[error("degenerate registration problem: {0}")]
    Degenerate(String),

    #[error("correlation is being minimized, images may be uncorrelated or non-overlapping")]
    Diverged,

    #[error("reference {reference:?} and target {target:?} shapes differ")]
    ShapeMismatch {
        reference: (usize, usize),
        target: (usize, usize),
    },
}
