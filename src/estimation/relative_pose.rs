//! Rigid transform placing one scan relative to another.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::affine::{self, Affine2};
use crate::geometry::attitude::{self, Attitude};

/// Translation (meters) and rotation of a scan relative to a reference scan.
///
/// The translation is expressed in the reference scan's local frame. The
/// rotation is applied on the left of the reference attitude to obtain the
/// other scan's attitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativePose {
    pub translation: Vector3<f64>,
    pub rotation: Attitude,
}

impl RelativePose {
    pub fn new(translation: Vector3<f64>, rotation: Attitude) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Convert a registration result into a pose.
    ///
    /// `m` maps target pixels onto reference pixels. Its rotation block
    /// becomes a yaw of `-θ`; its pixel translation becomes
    /// `-resolution · (tx, ty, 0)`.
    pub fn from_affine(m: &Affine2, resolution: f64) -> Self {
        let theta = m[(1, 0)].atan2(m[(0, 0)]);
        Self {
            translation: Vector3::new(-resolution * m[(0, 2)], -resolution * m[(1, 2)], 0.0),
            rotation: attitude::yaw_rotation(-theta),
        }
    }

    /// Pixel transform this pose was derived from; inverse of [`Self::from_affine`].
    pub fn to_affine(&self, resolution: f64) -> Affine2 {
        let planar = attitude::planar_rotation(&self.rotation);
        let theta = -planar[(1, 0)].atan2(planar[(0, 0)]);
        affine::euclidean(
            theta,
            -self.translation.x / resolution,
            -self.translation.y / resolution,
        )
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }
}

/// On-disk form of a [`RelativePose`]: quaternion stored as `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredPose {
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
}

impl From<&RelativePose> for StoredPose {
    fn from(pose: &RelativePose) -> Self {
        Self {
            translation: pose.translation.into(),
            rotation: attitude::to_quat_array(&pose.rotation),
        }
    }
}

impl From<&StoredPose> for RelativePose {
    fn from(stored: &StoredPose) -> Self {
        Self {
            translation: Vector3::from(stored.translation),
            rotation: attitude::from_quat_array(stored.rotation),
        }
    }
}
