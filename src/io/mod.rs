pub mod atomic;
pub mod dataset;
pub mod export;

pub use dataset::{ScanDataset, ScanEntry};
