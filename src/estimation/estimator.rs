//! Relative pose estimation between two scans from image content.
//!
//! Pipeline for `estimate(reference, other)`:
//! 1. Cache lookup when both scans carry an id and a cache is attached.
//! 2. Restrict both images to their predicted mutual coverage.
//! 3. Register the restricted images (Euclidean model).
//! 4. Convert the pixel transform into a metric [`RelativePose`] and
//!    memoize it.
//!
//! Registration failures are values ([`PoseEstimate::Failed`]), not errors;
//! cache I/O problems and resolution mismatches still propagate.

use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::error::{MapError, RegistrationFailure, Result};
use crate::geometry::attitude::{self, Attitude};
use crate::registration::{EccAligner, EccConfig, ImageRegistration};
use crate::scan::Scan;

use super::cache::{CacheKey, PoseCache};
use super::relative_pose::RelativePose;

/// Outcome of one relative pose estimation.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseEstimate {
    /// Served from the pose cache without registering.
    Cached(RelativePose),
    /// Freshly computed by image registration.
    Registered(RelativePose),
    /// Registration did not produce a usable transform.
    Failed(RegistrationFailure),
}

impl PoseEstimate {
    pub fn pose(&self) -> Option<&RelativePose> {
        match self {
            PoseEstimate::Cached(pose) | PoseEstimate::Registered(pose) => Some(pose),
            PoseEstimate::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PoseEstimate::Failed(_))
    }
}

/// Where an absolute pose estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSource {
    Image,
    Fallback,
}

/// Absolute pose of a scan derived from a reference scan.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatedPose {
    pub position: Vector3<f64>,
    pub attitude: Attitude,
    pub source: PoseSource,
}

/// Relative pose estimator over an image-registration primitive.
#[derive(Debug, Clone)]
pub struct PoseEstimator<R = EccAligner> {
    registration: R,
    cache: Option<PoseCache>,
}

impl PoseEstimator<EccAligner> {
    /// Estimator using ECC alignment with `config`, without a cache.
    pub fn new(config: EccConfig) -> Self {
        Self::with_registration(EccAligner::new(config))
    }
}

impl<R: ImageRegistration> PoseEstimator<R> {
    pub fn with_registration(registration: R) -> Self {
        Self {
            registration,
            cache: None,
        }
    }

    /// Memoize successful estimates in `cache`.
    pub fn with_cache(mut self, cache: PoseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&PoseCache> {
        self.cache.as_ref()
    }

    /// Pose of `other` relative to `reference`.
    pub fn estimate(&self, reference: &Scan, other: &Scan) -> Result<PoseEstimate> {
        check_resolution(reference, other)?;

        let cache_slot = match (&self.cache, reference.id(), other.id()) {
            (Some(cache), Some(source), Some(target)) => Some((cache, CacheKey::new(source, target))),
            _ => None,
        };
        if let Some((cache, key)) = &cache_slot {
            if let Some(pose) = cache.get(key)? {
                debug!(%key, "relative pose served from cache");
                return Ok(PoseEstimate::Cached(pose));
            }
        }

        let (reference_part, other_part) = reference.overlap(other)?;
        let m = match self.registration.register(&reference_part, &other_part) {
            Ok(m) => m,
            Err(failure) => return Ok(PoseEstimate::Failed(failure)),
        };

        let pose = RelativePose::from_affine(&m, reference.resolution());
        if !pose.is_finite() {
            return Ok(PoseEstimate::Failed(RegistrationFailure::Degenerate(
                "non-finite transform".to_string(),
            )));
        }
        if let Some((cache, key)) = &cache_slot {
            cache.insert(key, &pose)?;
        }
        Ok(PoseEstimate::Registered(pose))
    }

    /// Absolute pose of `other`, from image content when possible.
    ///
    /// When registration fails the pose degrades to the scans' own
    /// positions (altitude offset dropped) and `other`'s roll/pitch under
    /// `reference`'s heading.
    pub fn image_position_from(&self, reference: &Scan, other: &Scan) -> Result<EstimatedPose> {
        let estimate = self.estimate(reference, other)?;
        let (pose, source) = match estimate {
            PoseEstimate::Cached(pose) | PoseEstimate::Registered(pose) => {
                let pose = RelativePose::new(pose.translation, pose.rotation * reference.attitude());
                (pose, PoseSource::Image)
            }
            PoseEstimate::Failed(failure) => {
                warn!(
                    reference = ?reference.id(),
                    other = ?other.id(),
                    %failure,
                    "image registration failed, using position-based pose"
                );
                (fallback_pose(reference, other), PoseSource::Fallback)
            }
        };

        let position =
            reference.position() - attitude::apply(reference.attitude(), &pose.translation, true);
        Ok(EstimatedPose {
            position,
            attitude: pose.rotation,
            source,
        })
    }
}

/// Translation from the scans' recorded positions and the heading-projected
/// attitude, packed as a pose whose rotation is already absolute.
fn fallback_pose(reference: &Scan, other: &Scan) -> RelativePose {
    let mut translation = reference.earth_to_local(&(reference.position() - other.position()));
    translation.z = 0.0;
    RelativePose::new(
        translation,
        attitude::with_heading_of(other.attitude(), reference.attitude()),
    )
}

fn check_resolution(reference: &Scan, other: &Scan) -> Result<()> {
    if reference.resolution() != other.resolution() {
        return Err(MapError::ResolutionMismatch {
            scan: other.resolution(),
            map: reference.resolution(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::affine::{self, Affine2};
    use crate::geometry::attitude::yaw_rotation;
    use crate::imaging::Raster;
    use crate::scan::ScanId;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    /// Succeeds with a fixed transform on the first call, fails afterwards.
    struct OneShot {
        calls: Cell<usize>,
        result: Affine2,
    }

    impl OneShot {
        fn new(result: Affine2) -> Self {
            Self {
                calls: Cell::new(0),
                result,
            }
        }
    }

    impl ImageRegistration for OneShot {
        fn register(&self, _: &Raster, _: &Raster) -> std::result::Result<Affine2, RegistrationFailure> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() == 1 {
                Ok(self.result)
            } else {
                Err(RegistrationFailure::Diverged)
            }
        }
    }

    struct AlwaysFails;

    impl ImageRegistration for AlwaysFails {
        fn register(&self, _: &Raster, _: &Raster) -> std::result::Result<Affine2, RegistrationFailure> {
            Err(RegistrationFailure::NoOverlap)
        }
    }

    fn pattern(x: f64, y: f64) -> f32 {
        (128.0
            + 50.0 * (x / 5.0).sin() * (y / 7.0).cos()
            + 35.0 * ((x + 2.0 * y) / 11.0).cos()
            + 20.0 * ((x - y) / 6.0).sin()) as f32
    }

    fn scan(id: u64, shift_px: f64, position: Vector3<f64>) -> Scan {
        let img = Raster::from_fn(64, 64, |r, c| pattern(c as f64 - shift_px, r as f64));
        Scan::new(ScanId::new(id), img, position, Attitude::identity(), 0.04).unwrap()
    }

    fn cache_in(dir: &tempfile::TempDir) -> PoseCache {
        let cache = PoseCache::new(dir.path().join("transformations.json"));
        cache.set_active_dataset("test").unwrap();
        cache
    }

    #[test]
    fn test_second_estimate_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = PoseEstimator::with_registration(OneShot::new(affine::euclidean(0.0, -1.0, 0.0)))
            .with_cache(cache_in(&dir));
        let a = scan(1, 0.0, Vector3::zeros());
        let b = scan(2, 0.0, Vector3::zeros());

        let first = estimator.estimate(&a, &b).unwrap();
        let second = estimator.estimate(&a, &b).unwrap();

        assert!(matches!(first, PoseEstimate::Registered(_)));
        assert!(matches!(second, PoseEstimate::Cached(_)));
        assert_eq!(estimator.registration.calls.get(), 1);
        assert_relative_eq!(second.pose().unwrap().translation.x, 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_synthetic_scans_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let estimator = PoseEstimator::with_registration(OneShot::new(affine::euclidean(0.0, 0.0, 0.0)))
            .with_cache(cache.clone());
        let a = Scan::synthetic(Raster::from_element(8, 8, 1.0), Vector3::zeros(), Attitude::identity(), 0.04)
            .unwrap();

        estimator.estimate(&a, &a).unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_failures_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let estimator = PoseEstimator::with_registration(AlwaysFails).with_cache(cache.clone());
        let a = scan(1, 0.0, Vector3::zeros());
        let b = scan(2, 0.0, Vector3::zeros());

        let result = estimator.estimate(&a, &b).unwrap();
        assert_eq!(result, PoseEstimate::Failed(RegistrationFailure::NoOverlap));
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_cache_without_namespace_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = PoseEstimator::with_registration(AlwaysFails)
            .with_cache(PoseCache::new(dir.path().join("t.json")));
        let a = scan(1, 0.0, Vector3::zeros());
        let b = scan(2, 0.0, Vector3::zeros());

        assert!(matches!(estimator.estimate(&a, &b), Err(MapError::InvalidCacheState)));
    }

    #[test]
    fn test_resolution_mismatch_rejected() {
        let estimator = PoseEstimator::with_registration(AlwaysFails);
        let a = scan(1, 0.0, Vector3::zeros());
        let b = Scan::new(ScanId::new(2), a.samples().clone(), Vector3::zeros(), Attitude::identity(), 0.05)
            .unwrap();
        assert!(matches!(
            estimator.estimate(&a, &b),
            Err(MapError::ResolutionMismatch { .. })
        ));
    }

    #[test]
    fn test_one_pixel_shift_end_to_end() {
        let estimator = PoseEstimator::new(EccConfig {
            max_iterations: 300,
            ..EccConfig::default()
        });
        let a = scan(1, 0.0, Vector3::new(10.0, 20.0, 0.0));
        // Same recorded pose, content moved one pixel along +x.
        let b = scan(2, 1.0, Vector3::new(10.0, 20.0, 0.0));

        let estimate = estimator.estimate(&a, &b).unwrap();
        let pose = estimate.pose().unwrap();

        assert_relative_eq!((pose.translation.x * 100.0).round() / 100.0, 0.04, epsilon = 1e-12);
        assert_relative_eq!(pose.translation.y, 0.0, epsilon = 0.004);
        assert!(pose.rotation.angle() < 5e-3);
    }

    #[test]
    fn test_image_position_applies_translation_in_reference_frame() {
        let estimator =
            PoseEstimator::with_registration(OneShot::new(affine::euclidean(0.0, -1.0, 0.0)));
        let mut a = scan(1, 0.0, Vector3::new(1.0, 2.0, 0.0));
        a = a.with_pose(*a.position(), yaw_rotation(std::f64::consts::FRAC_PI_2));
        let b = a.with_pose(*a.position(), *a.attitude());

        let estimated = estimator.image_position_from(&a, &b).unwrap();

        assert_eq!(estimated.source, PoseSource::Image);
        let expected = a.position() - a.local_to_earth(&Vector3::new(0.04, 0.0, 0.0));
        assert_relative_eq!(estimated.position, expected, epsilon = 1e-12);
        assert_relative_eq!(estimated.attitude, *a.attitude(), epsilon = 1e-12);
    }

    #[test]
    fn test_image_position_falls_back_on_failure() {
        let estimator = PoseEstimator::with_registration(AlwaysFails);
        let a = scan(1, 0.0, Vector3::new(0.0, 0.0, 5.0)).with_pose(
            Vector3::new(0.0, 0.0, 5.0),
            yaw_rotation(0.3),
        );
        let b = scan(2, 0.0, Vector3::zeros()).with_pose(
            Vector3::new(100.0, -40.0, 7.0),
            attitude::from_quat_array([0.05, 0.02, 0.5, 0.86]),
        );

        let estimated = estimator.image_position_from(&a, &b).unwrap();

        assert_eq!(estimated.source, PoseSource::Fallback);
        assert_relative_eq!(estimated.position.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(estimated.position.y, -40.0, epsilon = 1e-9);
        // Altitude offset is not carried over.
        assert_relative_eq!(estimated.position.z, 5.0, epsilon = 1e-9);

        let (roll, pitch, yaw) = estimated.attitude.euler_angles();
        let (b_roll, b_pitch, _) = b.attitude().euler_angles();
        assert_relative_eq!(roll, b_roll, epsilon = 1e-9);
        assert_relative_eq!(pitch, b_pitch, epsilon = 1e-9);
        assert_relative_eq!(yaw, 0.3, epsilon = 1e-9);
    }
}
