//! Relative pose estimation with a persistent memo and a position fallback.

pub mod cache;
pub mod estimator;
pub mod relative_pose;

pub use cache::{CacheKey, PoseCache};
pub use estimator::{EstimatedPose, PoseEstimate, PoseEstimator, PoseSource};
pub use relative_pose::RelativePose;
