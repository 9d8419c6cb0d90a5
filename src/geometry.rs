//! Rotation helpers shared by the solver stages.
//!
//! Frame convention: +Y up, +Z forward, +X right.

use nalgebra::{Unit, UnitQuaternion, Vector3};

/// Squared-length threshold below which a direction is considered degenerate.
pub const EPSILON: f32 = 1e-6;

pub fn up() -> Vector3<f32> {
    Vector3::y()
}

pub fn forward() -> Vector3<f32> {
    Vector3::z()
}

pub fn right() -> Vector3<f32> {
    Vector3::x()
}

/// Normalize `v`, or `None` if its squared length is below [`EPSILON`].
pub fn try_normalize(v: &Vector3<f32>) -> Option<Vector3<f32>> {
    if v.norm_squared() < EPSILON {
        None
    } else {
        Some(v.normalize())
    }
}

/// Normalize `v`, returning the zero vector for degenerate input.
pub fn normalize_or_zero(v: &Vector3<f32>) -> Vector3<f32> {
    try_normalize(v).unwrap_or_else(Vector3::zeros)
}

/// Shortest rotation taking direction `from` onto direction `to`.
///
/// Antiparallel inputs rotate half a turn about an axis orthogonal to `from`.
pub fn from_to_rotation(from: &Vector3<f32>, to: &Vector3<f32>) -> UnitQuaternion<f32> {
    if let Some(rotation) = UnitQuaternion::rotation_between(from, to) {
        return rotation;
    }
    if from.norm_squared() < EPSILON || to.norm_squared() < EPSILON {
        return UnitQuaternion::identity();
    }
    let axis = orthogonal(from);
    UnitQuaternion::from_axis_angle(&axis, std::f32::consts::PI)
}

/// Some unit vector orthogonal to `v`.
pub fn orthogonal(v: &Vector3<f32>) -> Unit<Vector3<f32>> {
    let reference = if v.normalize().dot(&up()).abs() > 0.99 {
        right()
    } else {
        up()
    };
    Unit::new_normalize(v.cross(&reference))
}

/// Spherical interpolation with `t` clamped to `[0, 1]`.
///
/// Falls back to normalized lerp when the two rotations are too close for
/// slerp to be well defined.
pub fn slerp(
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
    t: f32,
) -> UnitQuaternion<f32> {
    let t = t.clamp(0.0, 1.0);
    from.try_slerp(to, t, 1.0e-6)
        .unwrap_or_else(|| from.nlerp(to, t))
}

/// Scale a rotation by `weight` via slerp from identity.
pub fn scale_rotation(rotation: &UnitQuaternion<f32>, weight: f32) -> UnitQuaternion<f32> {
    slerp(&UnitQuaternion::identity(), rotation, weight)
}

/// Remove the component of `v` along the unit `normal`.
pub fn project_on_plane(v: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
    v - normal * v.dot(normal)
}

/// Unsigned angle between two directions in degrees.
pub fn angle_deg(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    a.angle(b).to_degrees()
}

/// Angle from `from` to `to` in degrees, signed by the right-hand rule about `axis`.
pub fn signed_angle_deg(from: &Vector3<f32>, to: &Vector3<f32>, axis: &Vector3<f32>) -> f32 {
    let angle = angle_deg(from, to);
    if axis.dot(&from.cross(to)) < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Angle between two orientations in degrees.
pub fn rotation_angle_deg(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> f32 {
    a.angle_to(b).to_degrees()
}
