//! Scan identifiers.

use serde::{Deserialize, Serialize};

/// Unique identifier of a sensor scan (its capture timestamp).
///
/// Synthetic scans built for queries or overlap masks carry no id and are
/// never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanId(pub u64);

impl ScanId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
