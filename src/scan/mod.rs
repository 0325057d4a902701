//! Radar scans: intensity images placed in the earth frame.

pub mod scan;
pub mod types;

pub use scan::Scan;
pub use types::ScanId;
