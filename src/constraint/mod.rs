//! Joint constraints applied to solved positions.
//!
//! A constraint attached to bone `j` limits the direction from `j` to each of
//! its children, measured against the rest-pose direction. Hinges clamp the
//! signed angle about an axis; balls clamp the cone angle. Corrections in
//! one pass can push later bones out of range, so several passes may run,
//! but a fixed point is not guaranteed within the pass cap.

use std::collections::BTreeMap;

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::geometry::{self, angle_deg, project_on_plane, signed_angle_deg};
use crate::skeleton::{BoneId, Skeleton};

const fn default_max_angle() -> f32 {
    180.0
}
const fn default_strength() -> f32 {
    1.0
}
const fn default_true() -> bool {
    true
}

/// Squared length below which a projected direction has no usable angle.
const MIN_PROJECTION_SQ: f32 = 0.01;
/// Squared length a normalized hinge axis must exceed.
const MIN_AXIS_SQ: f32 = 0.9;

/// Constraint shape as written in a rig file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    #[default]
    None,
    /// Rotation about `axis`, given in the bone's local frame.
    Hinge { axis: [f32; 3] },
    Ball,
}

/// One row of the constraint table: bone name plus limits in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub bone: String,
    #[serde(flatten)]
    pub kind: ConstraintKind,
    #[serde(default)]
    pub min_angle: f32,
    #[serde(default = "default_max_angle")]
    pub max_angle: f32,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ConstraintDef {
    pub fn hinge(bone: impl Into<String>, axis: [f32; 3], min_angle: f32, max_angle: f32) -> Self {
        Self {
            bone: bone.into(),
            kind: ConstraintKind::Hinge { axis },
            min_angle,
            max_angle,
            strength: default_strength(),
            enabled: true,
        }
    }

    pub fn ball(bone: impl Into<String>, min_angle: f32, max_angle: f32) -> Self {
        Self {
            bone: bone.into(),
            kind: ConstraintKind::Ball,
            min_angle,
            max_angle,
            strength: default_strength(),
            enabled: true,
        }
    }

    pub fn strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }
}

/// Resolved limit shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointLimit {
    /// Hinge axis cached in world space from the bone's rest orientation.
    Hinge {
        local_axis: Unit<Vector3<f32>>,
        world_axis: Unit<Vector3<f32>>,
    },
    Ball,
}

/// A constraint bound to a skeleton bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointConstraint {
    pub limit: JointLimit,
    pub min_angle: f32,
    pub max_angle: f32,
    pub strength: f32,
    pub enabled: bool,
}

impl JointConstraint {
    /// Bind a definition to a bone with the given rest orientation.
    ///
    /// Returns `None` for `ConstraintKind::None` and for degenerate hinge axes.
    pub fn resolve(def: &ConstraintDef, rest_rotation: &UnitQuaternion<f32>) -> Option<Self> {
        let limit = match def.kind {
            ConstraintKind::None => return None,
            ConstraintKind::Ball => JointLimit::Ball,
            ConstraintKind::Hinge { axis } => {
                let local = geometry::normalize_or_zero(&Vector3::from(axis));
                let world = geometry::normalize_or_zero(&(rest_rotation * local));
                if world.norm_squared() < MIN_AXIS_SQ {
                    warn!(bone = %def.bone, ?axis, "degenerate hinge axis, constraint disabled");
                    return None;
                }
                JointLimit::Hinge {
                    local_axis: Unit::new_unchecked(local),
                    world_axis: Unit::new_unchecked(world),
                }
            }
        };
        let (min_angle, max_angle) = if def.min_angle <= def.max_angle {
            (def.min_angle, def.max_angle)
        } else {
            warn!(bone = %def.bone, "min_angle > max_angle, swapping");
            (def.max_angle, def.min_angle)
        };
        Some(Self {
            limit,
            min_angle,
            max_angle,
            strength: def.strength.clamp(0.0, 1.0),
            enabled: def.enabled,
        })
    }

    /// Full (strength 1) correction bringing `current` back inside the limit.
    pub fn correction(
        &self,
        rest: &Vector3<f32>,
        current: &Vector3<f32>,
    ) -> Option<UnitQuaternion<f32>> {
        match self.limit {
            JointLimit::Hinge { world_axis, .. } => {
                hinge_correction(&world_axis, rest, current, self.min_angle, self.max_angle)
            }
            JointLimit::Ball => ball_correction(rest, current, self.min_angle, self.max_angle),
        }
    }
}

fn clamp_angle(angle: f32, min: f32, max: f32) -> f32 {
    angle.max(min).min(max)
}

/// Rotation about `axis` that brings the signed hinge angle of `current`
/// (relative to `rest`, both projected onto the hinge plane) into `[min, max]`.
///
/// `None` when already inside or when a projection degenerates.
pub fn hinge_correction(
    axis: &Unit<Vector3<f32>>,
    rest: &Vector3<f32>,
    current: &Vector3<f32>,
    min: f32,
    max: f32,
) -> Option<UnitQuaternion<f32>> {
    let rest_proj = project_on_plane(rest, axis);
    let current_proj = project_on_plane(current, axis);
    if rest_proj.norm_squared() < MIN_PROJECTION_SQ || current_proj.norm_squared() < MIN_PROJECTION_SQ
    {
        return None;
    }
    let angle = signed_angle_deg(&rest_proj, &current_proj, axis);
    if (min..=max).contains(&angle) {
        return None;
    }
    let delta = clamp_angle(angle, min, max) - angle;
    Some(UnitQuaternion::from_axis_angle(axis, delta.to_radians()))
}

/// Rotation bringing the cone angle between `rest` and `current` into
/// `[min, max]`, about `rest × current` (vertical when that degenerates).
pub fn ball_correction(
    rest: &Vector3<f32>,
    current: &Vector3<f32>,
    min: f32,
    max: f32,
) -> Option<UnitQuaternion<f32>> {
    let angle = angle_deg(rest, current);
    if (min..=max).contains(&angle) {
        return None;
    }
    let delta = clamp_angle(angle, min, max) - angle;
    let axis = geometry::try_normalize(&rest.cross(current)).unwrap_or_else(geometry::up);
    Some(UnitQuaternion::from_axis_angle(
        &Unit::new_unchecked(axis),
        delta.to_radians(),
    ))
}

/// Constraints keyed by bone, applied in bone-id (hierarchy build) order.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: BTreeMap<BoneId, JointConstraint>,
}

impl ConstraintSet {
    /// Resolve a constraint table against a skeleton.
    ///
    /// Rows naming unknown bones or carrying degenerate axes are skipped.
    pub fn resolve(skeleton: &Skeleton, defs: &[ConstraintDef]) -> Self {
        let mut constraints = BTreeMap::new();
        for def in defs {
            if def.bone.is_empty() {
                continue;
            }
            let Some(id) = skeleton.find(&def.bone) else {
                warn!(bone = %def.bone, "constraint names an unknown bone, skipped");
                continue;
            };
            let Some(constraint) = JointConstraint::resolve(def, &skeleton.bone(id).rest_rotation())
            else {
                continue;
            };
            debug!(
                bone = %def.bone,
                kind = ?constraint.limit,
                strength = constraint.strength,
                "constraint registered"
            );
            constraints.insert(id, constraint);
        }
        Self { constraints }
    }

    pub fn get(&self, id: BoneId) -> Option<&JointConstraint> {
        self.constraints.get(&id)
    }

    pub fn insert(&mut self, id: BoneId, constraint: JointConstraint) {
        self.constraints.insert(id, constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BoneId, &JointConstraint)> {
        self.constraints.iter().map(|(&id, c)| (id, c))
    }

    /// Run up to `passes` constraint passes over the working pose.
    ///
    /// Stops after the first pass that corrects nothing. A correction may
    /// push a later joint out of its limit, so the pose is not guaranteed to
    /// satisfy every limit when the pass budget runs out. Returns the total
    /// number of corrections.
    pub fn apply_passes(&self, skeleton: &mut Skeleton, passes: u32) -> usize {
        let mut total = 0;
        for pass in 0..passes {
            let mut applied = 0;
            for (id, constraint) in self.iter() {
                if constraint.enabled && apply_to_joint(skeleton, id, constraint) {
                    applied += 1;
                }
            }
            total += applied;
            debug!(pass = pass + 1, passes, applied, "constraint pass");
            if applied == 0 {
                break;
            }
        }
        total
    }
}

/// Clamp every child direction of `joint`. Returns whether anything changed.
fn apply_to_joint(skeleton: &mut Skeleton, joint: BoneId, constraint: &JointConstraint) -> bool {
    let mut changed = false;
    for child in skeleton.children(joint) {
        let joint_position = skeleton.bone(joint).position;
        let bone = skeleton.bone(child);
        let rest = bone.rest_world_direction();
        let length = bone.length_or_zero();
        let Some(current) = geometry::try_normalize(&(bone.position - joint_position)) else {
            continue;
        };
        let Some(correction) = constraint.correction(&rest, &current) else {
            continue;
        };

        let applied = geometry::scale_rotation(&correction, constraint.strength);
        let joint_bone = skeleton.bone_mut(joint);
        joint_bone.rotation = applied * joint_bone.rotation;
        skeleton.bone_mut(child).position = joint_position + (applied * current) * length;
        rebuild_descendants(skeleton, child);

        trace!(
            joint = %skeleton.bone(joint).name,
            child = %skeleton.bone(child).name,
            degrees = correction.angle().to_degrees(),
            "constraint correction"
        );
        changed = true;
    }
    changed
}

/// Re-place every descendant of `id` at its rest length from its parent,
/// keeping its current direction (or the parent's rest local direction when
/// the current one collapsed).
pub fn rebuild_descendants(skeleton: &mut Skeleton, id: BoneId) {
    let parent = skeleton.bone(id);
    let (position, rotation) = (parent.position, parent.rotation);
    for child in skeleton.children(id) {
        let bone = skeleton.bone(child);
        let direction = geometry::try_normalize(&(bone.position - position))
            .unwrap_or_else(|| rotation * bone.rest_local_direction());
        let length = bone.length_or_zero();
        skeleton.bone_mut(child).position = position + direction * length;
        rebuild_descendants(skeleton, child);
    }
}
