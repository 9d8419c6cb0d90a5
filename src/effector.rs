//! End-effectors: bones driven toward external targets.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::skeleton::BoneId;

const fn default_weight() -> f32 {
    1.0
}
const fn default_true() -> bool {
    true
}

/// Static description of an end-effector, as found in a rig file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectorDef {
    pub name: String,
    /// Name of the bone driven toward the target.
    pub bone: String,
    /// Number of bones in the chain, effector included. `0` reaches the root.
    #[serde(default)]
    pub chain_length: usize,
    /// Influence on bones shared with other effectors (0..=1).
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Higher priorities are solved first within a round.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Blend of the pole correction (0..=1).
    #[serde(default = "default_weight")]
    pub pole_weight: f32,
    /// Chain index of the joint the pole acts on; the chain midpoint when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_bone_index: Option<usize>,
}

impl EffectorDef {
    pub fn new(name: impl Into<String>, bone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bone: bone.into(),
            chain_length: 0,
            weight: default_weight(),
            priority: 0,
            enabled: true,
            pole_weight: default_weight(),
            pole_bone_index: None,
        }
    }

    pub fn chain_length(mut self, chain_length: usize) -> Self {
        self.chain_length = chain_length;
        self
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn pole_weight(mut self, pole_weight: f32) -> Self {
        self.pole_weight = pole_weight;
        self
    }

    pub fn pole_bone_index(mut self, index: usize) -> Self {
        self.pole_bone_index = Some(index);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Runtime end-effector: a definition bound to a skeleton.
#[derive(Debug, Clone)]
pub struct EndEffector {
    pub def: EffectorDef,
    /// World-space target, updated by the host every tick.
    pub target: Vector3<f32>,
    /// World-space pole position, if any.
    pub pole: Option<Vector3<f32>>,
    bone: Option<BoneId>,
    chain: Option<Chain>,
    last_error: f32,
}

impl EndEffector {
    pub(crate) fn unresolved(def: EffectorDef) -> Self {
        Self {
            def,
            target: Vector3::zeros(),
            pole: None,
            bone: None,
            chain: None,
            last_error: f32::MAX,
        }
    }

    pub(crate) fn resolved(def: EffectorDef, bone: BoneId, chain: Chain, target: Vector3<f32>) -> Self {
        Self {
            bone: Some(bone),
            chain: Some(chain),
            target,
            ..Self::unresolved(def)
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn bone(&self) -> Option<BoneId> {
        self.bone
    }

    pub fn chain(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    /// Whether this effector takes part in a solve: enabled, bound, and
    /// owning at least one bone segment.
    pub fn is_active(&self) -> bool {
        self.def.enabled && self.chain.as_ref().is_some_and(Chain::is_solvable)
    }

    /// Error of the most recent outer round, `f32::MAX` before the first solve.
    pub fn last_error(&self) -> f32 {
        self.last_error
    }

    pub(crate) fn set_last_error(&mut self, error: f32) {
        self.last_error = error;
    }

    pub fn set_target(&mut self, target: Vector3<f32>) {
        self.target = target;
    }

    pub fn set_pole(&mut self, pole: Vector3<f32>) {
        self.pole = Some(pole);
    }

    pub fn clear_pole(&mut self) {
        self.pole = None;
    }

    /// Pole position when pole correction should run.
    pub(crate) fn active_pole(&self) -> Option<Vector3<f32>> {
        self.pole.filter(|_| self.def.pole_weight > 0.0)
    }

    /// Weight clamped to `[0, 1]`.
    pub fn clamped_weight(&self) -> f32 {
        self.def.weight.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn def_defaults_from_toml() {
        let def: EffectorDef = toml::from_str("name = \"head\"\nbone = \"head\"").unwrap();
        assert_eq!(def, EffectorDef::new("head", "head"));
        assert!(def.enabled);
        assert_eq!(def.chain_length, 0);
        assert_eq!(def.pole_bone_index, None);
    }

    #[test]
    fn unresolved_effector_is_inactive() {
        let effector = EndEffector::unresolved(EffectorDef::new("hand", "missing"));
        assert!(!effector.is_active());
        assert_eq!(effector.last_error(), f32::MAX);
    }

    #[test]
    fn pole_needs_weight() {
        let mut effector = EndEffector::unresolved(EffectorDef::new("hand", "hand").pole_weight(0.0));
        effector.set_pole(Vector3::z());
        assert_eq!(effector.active_pole(), None);
        effector.def.pole_weight = 0.5;
        assert_eq!(effector.active_pole(), Some(Vector3::z()));
        effector.clear_pole();
        assert_eq!(effector.active_pole(), None);
    }

    #[test]
    fn weight_is_clamped() {
        let effector = EndEffector::unresolved(EffectorDef::new("hand", "hand").weight(3.0));
        assert_eq!(effector.clamped_weight(), 1.0);
    }
}
