//! Pole-vector correction: swing a solved chain's bend plane toward a pole point.

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::chain::Chain;
use crate::geometry::{self, EPSILON};
use crate::skeleton::Skeleton;

/// Root-to-tip distance over maximum reach above which a chain counts as straight.
pub const FULL_STRETCH_RATIO: f32 = 0.9;

/// What [`apply_pole`] did to a chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoleOutcome {
    /// The bend plane was rotated by this many degrees.
    Applied { degrees: f32 },
    /// Fewer than three joints, or zero weight.
    Skipped,
    /// The chain is too close to full extension to have a bend plane.
    NearFullStretch,
    /// The chain is nearly straight or the pole lies on the root-tip axis.
    Degenerate,
}

/// Chain index of the joint the pole acts on.
///
/// A configured index is clamped to the chain interior; otherwise the middle
/// joint is used. Expects `chain_len >= 3`.
pub fn pole_joint_index(chain_len: usize, configured: Option<usize>) -> usize {
    match configured {
        Some(index) => index.clamp(1, chain_len.saturating_sub(2).max(1)),
        None => chain_len / 2,
    }
}

/// Rotate the chain's working positions about its root-to-tip axis so the
/// pole joint bends toward `pole`, blended by `weight`.
pub fn apply_pole(
    skeleton: &mut Skeleton,
    chain: &Chain,
    pole: Vector3<f32>,
    pole_bone_index: Option<usize>,
    weight: f32,
) -> PoleOutcome {
    let ids = chain.bones();
    if ids.len() < 3 || weight <= 0.0 {
        return PoleOutcome::Skipped;
    }
    let lengths = chain.lengths(skeleton);
    let reach: f32 = lengths.iter().sum();
    let mut positions: Vec<Vector3<f32>> = ids.iter().map(|&id| skeleton.bone(id).position).collect();
    let start = positions[0];
    let tip = positions[positions.len() - 1];
    let mid = positions[pole_joint_index(ids.len(), pole_bone_index)];

    if reach < EPSILON {
        return PoleOutcome::Degenerate;
    }
    if (tip - start).norm() / reach > FULL_STRETCH_RATIO {
        return PoleOutcome::NearFullStretch;
    }

    let current_normal = (tip - start).cross(&(mid - start));
    let pole_normal = (tip - start).cross(&(pole - start));
    if current_normal.norm_squared() < EPSILON || pole_normal.norm_squared() < EPSILON {
        return PoleOutcome::Degenerate;
    }
    let Some(to_tip) = geometry::try_normalize(&(tip - start)) else {
        return PoleOutcome::Degenerate;
    };

    let rotation = UnitQuaternion::rotation_between(&current_normal, &pole_normal).unwrap_or_else(|| {
        // opposite normals: half turn about the root-tip axis
        UnitQuaternion::from_axis_angle(&Unit::new_unchecked(to_tip), std::f32::consts::PI)
    });
    let rotation = geometry::scale_rotation(&rotation, weight);

    for position in positions.iter_mut().skip(1) {
        *position = start + rotation * (*position - start);
    }
    for i in 1..positions.len() {
        if let Some(dir) = geometry::try_normalize(&(positions[i] - positions[i - 1])) {
            positions[i] = positions[i - 1] + dir * lengths[i];
        }
    }
    for (&id, &position) in ids.iter().zip(&positions) {
        skeleton.bone_mut(id).position = position;
    }

    PoleOutcome::Applied {
        degrees: rotation.angle().to_degrees(),
    }
}
