//! Attitude primitives: apply, compose, and convert 3D rotations.
//!
//! An [`Attitude`] maps earth-frame vectors into a sensor's local
//! right-backward-down (RBD) frame:
//!
//! ```text
//! v_local = R * v_earth          apply(R, v, false)
//! v_earth = R⁻¹ * v_local        apply(R, v, true)
//! ```
//!
//! Only the yaw plane is modelled for image warps; the planar part of a
//! rotation is obtained with [`planar_rotation`].

use nalgebra::{
    Matrix2, Matrix3, Matrix3xX, Quaternion, Rotation2, Rotation3, UnitQuaternion, Vector3,
};

/// Rotation from the earth frame into a local sensor frame.
pub type Attitude = UnitQuaternion<f64>;

/// Rotate a vector between earth and local frame.
///
/// With `inverse == false` the vector is taken from earth to local frame,
/// otherwise from local to earth frame.
#[inline]
pub fn apply(attitude: &Attitude, v: &Vector3<f64>, inverse: bool) -> Vector3<f64> {
    if inverse {
        attitude.inverse_transform_vector(v)
    } else {
        attitude.transform_vector(v)
    }
}

/// Rotate a batch of column vectors (one per pixel) at once.
pub fn apply_batch(attitude: &Attitude, points: &Matrix3xX<f64>, inverse: bool) -> Matrix3xX<f64> {
    let rot = if inverse {
        attitude.inverse().to_rotation_matrix()
    } else {
        attitude.to_rotation_matrix()
    };
    rot.matrix() * points
}

/// Rotation taking frame `other` into frame `reference`: `R_ref · R_other⁻¹`.
#[inline]
pub fn relative(reference: &Attitude, other: &Attitude) -> Attitude {
    reference * other.inverse()
}

/// Direction-cosine matrix of an attitude.
#[inline]
pub fn to_dcm(attitude: &Attitude) -> Matrix3<f64> {
    attitude.to_rotation_matrix().into_inner()
}

/// Attitude from a direction-cosine matrix, re-orthonormalized.
pub fn from_dcm(dcm: &Matrix3<f64>) -> Attitude {
    let rot = Rotation3::from_matrix(dcm);
    UnitQuaternion::from_rotation_matrix(&rot)
}

/// Quaternion as `[x, y, z, w]`, the order used in persisted files.
#[inline]
pub fn to_quat_array(attitude: &Attitude) -> [f64; 4] {
    let q = attitude.quaternion();
    [q.i, q.j, q.k, q.w]
}

/// Attitude from an `[x, y, z, w]` quaternion (normalized on the way in).
#[inline]
pub fn from_quat_array(q: [f64; 4]) -> Attitude {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

/// Rotation of `angle` radians about the local z axis.
#[inline]
pub fn yaw_rotation(angle: f64) -> Attitude {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle)
}

/// Planar (yaw-plane) part of a rotation as an orthonormal 2×2 matrix.
///
/// The upper-left 2×2 block of the DCM is projected back onto SO(2), which
/// drops any pitch/roll contamination.
pub fn planar_rotation(attitude: &Attitude) -> Matrix2<f64> {
    let dcm = to_dcm(attitude);
    let angle = dcm[(1, 0)].atan2(dcm[(0, 0)]);
    Rotation2::new(angle).into_inner()
}

/// Combine the roll/pitch of `attitude` with the heading of `heading_source`.
pub fn with_heading_of(attitude: &Attitude, heading_source: &Attitude) -> Attitude {
    let (roll, pitch, _) = attitude.euler_angles();
    let (_, _, yaw) = heading_source.euler_angles();
    UnitQuaternion::from_euler_angles(roll, pitch, yaw)
}
