//! Pose commit: turn solved joint positions into host bone rotations.
//!
//! For every chain link the rotation taking the link's pre-solve direction
//! onto its solved direction is applied to the parent bone. Bones shared by
//! several effectors blend their targets by effector weight. The blended
//! target is then scaled by the global weight, limited to the angular speed
//! budget and damped toward the previously committed rotation.

use std::collections::HashMap;

use nalgebra::UnitQuaternion;
use tracing::trace;

use crate::config::SolverConfig;
use crate::effector::EndEffector;
use crate::geometry::{self, EPSILON};
use crate::skeleton::{BoneId, Skeleton};

/// Parameters of the rotation stabilization stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitSettings {
    pub global_weight: f32,
    /// Degrees per second; zero disables the clamp.
    pub max_rotation_speed: f32,
    pub rotation_damping: f32,
    /// Seconds since the previous tick.
    pub dt: f32,
}

impl CommitSettings {
    pub fn new(config: &SolverConfig, dt: f32) -> Self {
        Self {
            global_weight: config.global_weight,
            max_rotation_speed: config.max_rotation_speed,
            rotation_damping: config.rotation_damping,
            dt,
        }
    }
}

type Contributions = HashMap<BoneId, Vec<(UnitQuaternion<f32>, f32)>>;

/// Collect `(target rotation, weight)` pairs per parent bone for every chain link.
fn collect_contributions<'a>(
    skeleton: &Skeleton,
    effectors: impl IntoIterator<Item = &'a EndEffector>,
) -> Contributions {
    let mut contributions = Contributions::new();
    for effector in effectors {
        let Some(chain) = effector.chain().filter(|chain| chain.is_solvable()) else {
            continue;
        };
        let weight = effector.clamped_weight();
        for link in chain.bones().windows(2) {
            let (parent, child) = (link[0], link[1]);
            let solved = skeleton.bone(child).position - skeleton.bone(parent).position;
            let previous = skeleton.world_position(child) - skeleton.world_position(parent);
            let (Some(new_dir), Some(old_dir)) =
                (geometry::try_normalize(&solved), geometry::try_normalize(&previous))
            else {
                continue;
            };
            let delta = geometry::from_to_rotation(&old_dir, &new_dir);
            let target = delta * skeleton.world_rotation(parent);
            contributions.entry(parent).or_default().push((target, weight));
        }
    }
    contributions
}

/// Fold contributions into `start` by successive slerps with normalized weights.
pub fn blend_rotations(
    start: &UnitQuaternion<f32>,
    contributions: &[(UnitQuaternion<f32>, f32)],
) -> Option<UnitQuaternion<f32>> {
    let total: f32 = contributions.iter().map(|(_, w)| w).sum();
    if total < EPSILON {
        return None;
    }
    Some(
        contributions
            .iter()
            .fold(*start, |blended, (rotation, w)| {
                geometry::slerp(&blended, rotation, w / total)
            }),
    )
}

/// Limit the step from `previous` to `target` to `max_degrees`.
pub fn clamp_rotation_speed(
    previous: &UnitQuaternion<f32>,
    target: &UnitQuaternion<f32>,
    max_degrees: f32,
) -> UnitQuaternion<f32> {
    let angle = geometry::rotation_angle_deg(previous, target);
    if angle > max_degrees {
        geometry::slerp(previous, target, max_degrees.max(0.0) / angle)
    } else {
        *target
    }
}

/// Interpolate from the last committed rotation toward `target` by `1 - damping`.
pub fn damp_rotation(
    last: &UnitQuaternion<f32>,
    target: &UnitQuaternion<f32>,
    damping: f32,
) -> UnitQuaternion<f32> {
    if damping > 0.0 {
        geometry::slerp(last, target, 1.0 - damping)
    } else {
        *target
    }
}

/// Write the solved pose into the skeleton's host pose.
///
/// Bones are written parents first so every explicit world rotation is
/// final. Returns how many bones were written.
pub fn commit_pose<'a>(
    skeleton: &mut Skeleton,
    effectors: impl IntoIterator<Item = &'a EndEffector>,
    settings: &CommitSettings,
) -> usize {
    let contributions = collect_contributions(skeleton, effectors);

    let mut bones: Vec<BoneId> = contributions.keys().copied().collect();
    bones.sort_by_key(|&id| (skeleton.bone(id).depth(), id));
    let previous: HashMap<BoneId, UnitQuaternion<f32>> = bones
        .iter()
        .map(|&id| (id, skeleton.world_rotation(id)))
        .collect();

    let max_step = settings.max_rotation_speed * settings.dt;
    let mut written = 0;
    for id in bones {
        let previous = previous[&id];
        let Some(blended) = blend_rotations(&previous, &contributions[&id]) else {
            continue;
        };
        let mut target = geometry::slerp(&previous, &blended, settings.global_weight);
        if settings.max_rotation_speed > 0.0 {
            target = clamp_rotation_speed(&previous, &target, max_step);
        }
        let last = skeleton.bone(id).last_rotation;
        target = damp_rotation(&last, &target, settings.rotation_damping);

        trace!(
            bone = %skeleton.bone(id).name,
            degrees = geometry::rotation_angle_deg(&previous, &target),
            "commit rotation"
        );
        skeleton.set_world_rotation(id, target);
        skeleton.bone_mut(id).last_rotation = target;
        written += 1;
    }
    written
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::Chain;
    use crate::effector::EffectorDef;
    use crate::skeleton::{BoneDesc, Hierarchy};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn yaw(degrees: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees.to_radians())
    }

    fn settings() -> CommitSettings {
        CommitSettings {
            global_weight: 1.0,
            max_rotation_speed: 0.0,
            rotation_damping: 0.0,
            dt: 1.0 / 60.0,
        }
    }

    #[test]
    fn single_contribution_is_taken_whole() {
        let blended = blend_rotations(&yaw(0.0), &[(yaw(40.0), 0.3)]).unwrap();
        assert_relative_eq!(blended.angle_to(&yaw(40.0)), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_weights_blend_to_nothing() {
        assert!(blend_rotations(&yaw(0.0), &[(yaw(40.0), 0.0)]).is_none());
    }

    #[test]
    fn speed_clamp_limits_step() {
        let clamped = clamp_rotation_speed(&yaw(0.0), &yaw(90.0), 30.0);
        assert_relative_eq!(geometry::rotation_angle_deg(&yaw(0.0), &clamped), 30.0, epsilon = 1e-3);
        let free = clamp_rotation_speed(&yaw(0.0), &yaw(20.0), 30.0);
        assert_relative_eq!(free.angle_to(&yaw(20.0)), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn damping_interpolates_from_last_commit() {
        let damped = damp_rotation(&yaw(0.0), &yaw(100.0), 0.25);
        assert_relative_eq!(geometry::rotation_angle_deg(&yaw(0.0), &damped), 75.0, epsilon = 1e-3);
        let undamped = damp_rotation(&yaw(0.0), &yaw(100.0), 0.0);
        assert_relative_eq!(undamped.angle_to(&yaw(100.0)), 0.0, epsilon = 1e-6);
    }

    fn bone_on_x() -> (Skeleton, EndEffector) {
        let skeleton = Skeleton::build(
            &Hierarchy::new()
                .bone(BoneDesc::new("base", None, Vector3::zeros()))
                .bone(BoneDesc::new("tip", Some("base"), Vector3::x())),
        )
        .unwrap();
        let tip = skeleton.find("tip").unwrap();
        let chain = Chain::to_root(&skeleton, tip);
        let effector = EndEffector::resolved(EffectorDef::new("tip", "tip"), tip, chain, Vector3::z());
        (skeleton, effector)
    }

    #[test]
    fn commit_rotates_parent_onto_solved_direction() {
        let (mut skeleton, effector) = bone_on_x();
        skeleton.load_working_pose();
        let tip = skeleton.find("tip").unwrap();
        skeleton.bone_mut(tip).position = Vector3::z();

        let written = commit_pose(&mut skeleton, [&effector], &settings());
        assert_eq!(written, 1);
        assert_relative_eq!(skeleton.world_position(tip), Vector3::z(), epsilon = 1e-5);
        let base = skeleton.root();
        assert_relative_eq!(
            skeleton.bone(base).last_rotation.angle_to(&skeleton.world_rotation(base)),
            0.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn global_weight_and_speed_limit_apply() {
        let (mut skeleton, effector) = bone_on_x();
        skeleton.load_working_pose();
        let tip = skeleton.find("tip").unwrap();
        let base = skeleton.root();
        skeleton.bone_mut(tip).position = Vector3::z();

        let half = CommitSettings {
            global_weight: 0.5,
            ..settings()
        };
        commit_pose(&mut skeleton, [&effector], &half);
        let turned = geometry::rotation_angle_deg(&UnitQuaternion::identity(), &skeleton.world_rotation(base));
        assert_relative_eq!(turned, 45.0, epsilon = 1e-3);

        let (mut skeleton, effector) = bone_on_x();
        skeleton.load_working_pose();
        skeleton.bone_mut(tip).position = Vector3::z();
        let slow = CommitSettings {
            max_rotation_speed: 60.0,
            dt: 0.25,
            ..settings()
        };
        commit_pose(&mut skeleton, [&effector], &slow);
        let turned = geometry::rotation_angle_deg(&UnitQuaternion::identity(), &skeleton.world_rotation(base));
        assert_relative_eq!(turned, 15.0, epsilon = 1e-3);
    }
}
