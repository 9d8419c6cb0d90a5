//! Ready-made tables for humanoid rigs.
//!
//! Bone names default to the usual humanoid avatar names and can be
//! overridden per rig. Rows naming bones the skeleton lacks are skipped at
//! bind time, so partial rigs work too.

use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintDef;
use crate::effector::EffectorDef;

/// Bone names of a humanoid rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanoidBones {
    pub hips: String,
    pub spine: String,
    pub chest: String,
    pub neck: String,
    pub head: String,
    pub left_shoulder: String,
    pub left_upper_arm: String,
    pub left_lower_arm: String,
    pub left_hand: String,
    pub right_shoulder: String,
    pub right_upper_arm: String,
    pub right_lower_arm: String,
    pub right_hand: String,
    pub left_upper_leg: String,
    pub left_lower_leg: String,
    pub left_foot: String,
    pub right_upper_leg: String,
    pub right_lower_leg: String,
    pub right_foot: String,
}

impl Default for HumanoidBones {
    fn default() -> Self {
        Self {
            hips: "Hips".into(),
            spine: "Spine".into(),
            chest: "Chest".into(),
            neck: "Neck".into(),
            head: "Head".into(),
            left_shoulder: "LeftShoulder".into(),
            left_upper_arm: "LeftUpperArm".into(),
            left_lower_arm: "LeftLowerArm".into(),
            left_hand: "LeftHand".into(),
            right_shoulder: "RightShoulder".into(),
            right_upper_arm: "RightUpperArm".into(),
            right_lower_arm: "RightLowerArm".into(),
            right_hand: "RightHand".into(),
            left_upper_leg: "LeftUpperLeg".into(),
            left_lower_leg: "LeftLowerLeg".into(),
            left_foot: "LeftFoot".into(),
            right_upper_leg: "RightUpperLeg".into(),
            right_lower_leg: "RightLowerLeg".into(),
            right_foot: "RightFoot".into(),
        }
    }
}

/// Maximum joint angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanoidLimits {
    pub elbow: f32,
    pub knee: f32,
    pub shoulder: f32,
    pub upper_arm: f32,
    pub upper_leg: f32,
    pub spine: f32,
    pub neck: f32,
    pub head: f32,
    pub foot: f32,
}

impl Default for HumanoidLimits {
    fn default() -> Self {
        Self {
            elbow: 160.0,
            knee: 130.0,
            shoulder: 5.0,
            upper_arm: 85.0,
            upper_leg: 65.0,
            spine: 30.0,
            neck: 30.0,
            head: 30.0,
            foot: 15.0,
        }
    }
}

/// Elbow and knee hinges plus ball limits on the remaining major joints.
pub fn humanoid_constraints(bones: &HumanoidBones, limits: &HumanoidLimits) -> Vec<ConstraintDef> {
    let mut rows = vec![
        ConstraintDef::hinge(&bones.left_lower_arm, [0.0, 0.0, -1.0], 0.0, limits.elbow),
        ConstraintDef::hinge(&bones.right_lower_arm, [0.0, 0.0, 1.0], 0.0, limits.elbow),
        ConstraintDef::hinge(&bones.left_lower_leg, [1.0, 0.0, 0.0], 0.0, limits.knee),
        ConstraintDef::hinge(&bones.right_lower_leg, [1.0, 0.0, 0.0], 0.0, limits.knee),
    ];
    let balls = [
        (&bones.left_shoulder, limits.shoulder),
        (&bones.right_shoulder, limits.shoulder),
        (&bones.left_upper_arm, limits.upper_arm),
        (&bones.right_upper_arm, limits.upper_arm),
        (&bones.left_upper_leg, limits.upper_leg),
        (&bones.right_upper_leg, limits.upper_leg),
        (&bones.hips, limits.spine),
        (&bones.spine, limits.spine),
        (&bones.chest, limits.spine),
        (&bones.neck, limits.neck),
        (&bones.head, limits.head),
        (&bones.left_foot, limits.foot),
        (&bones.right_foot, limits.foot),
    ];
    rows.extend(
        balls
            .into_iter()
            .map(|(bone, max_angle)| ConstraintDef::ball(bone, 0.0, max_angle)),
    );
    rows
}

/// Hands, feet and head, each with a chain reaching the hips.
///
/// Feet and head are solved before the hands so the body's stance is
/// settled before it reaches.
pub fn humanoid_effectors(bones: &HumanoidBones) -> Vec<EffectorDef> {
    vec![
        EffectorDef::new("left_hand", &bones.left_hand).priority(1),
        EffectorDef::new("right_hand", &bones.right_hand).priority(1),
        EffectorDef::new("left_foot", &bones.left_foot).priority(2),
        EffectorDef::new("right_foot", &bones.right_foot).priority(2),
        EffectorDef::new("head", &bones.head).priority(2),
    ]
}
