//! Solver configuration.
//!
//! Every field has a serde default so partial TOML files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintDef;
use crate::effector::EffectorDef;
use crate::error::ConfigError;

const fn default_main_iterations() -> u32 {
    10
}
const fn default_sub_iterations() -> u32 {
    3
}
const fn default_tolerance() -> f32 {
    0.01
}
const fn default_global_weight() -> f32 {
    1.0
}
const fn default_constraint_passes() -> u32 {
    2
}
const fn default_rotation_damping() -> f32 {
    0.15
}
const fn default_max_rotation_speed() -> f32 {
    120.0
}

/// When the joint constraint engine runs during a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Constraints are never applied.
    Disabled,
    /// Constraints run once, after FABRIK convergence and pole correction.
    #[default]
    AfterConvergence,
    /// Constraints run after every outer round and once more after pole correction.
    PostIteration,
}

/// How the skeleton root is held during the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootPinMode {
    /// Root stays where it was at initialization.
    #[default]
    InitialPose,
    /// Root stays wherever the host pose puts it this tick.
    CurrentPose,
    /// Root moves under chain pull.
    Free,
}

/// Configuration for [`FullBodyIk`](crate::FullBodyIk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Hard cap on outer coordinator rounds (1..=30).
    #[serde(default = "default_main_iterations")]
    pub main_iterations: u32,

    /// Backward/forward rounds per chain per outer round (1..=10).
    #[serde(default = "default_sub_iterations")]
    pub sub_iterations: u32,

    /// Effector error below which a chain counts as converged.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    /// Blend between the previous pose (0) and the solved pose (1).
    #[serde(default = "default_global_weight")]
    pub global_weight: f32,

    #[serde(default)]
    pub constraint_mode: ConstraintMode,

    /// Upper bound on constraint passes (1..=10).
    #[serde(default = "default_constraint_passes")]
    pub constraint_passes: u32,

    /// Temporal damping toward the last committed rotation (0..=0.8).
    #[serde(default = "default_rotation_damping")]
    pub rotation_damping: f32,

    /// Degrees per second. Zero disables the speed clamp.
    #[serde(default = "default_max_rotation_speed")]
    pub max_rotation_speed: f32,

    #[serde(default)]
    pub root_pin_mode: RootPinMode,

    /// Legacy switch. `false` together with the default pin mode means `Free`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_root: Option<bool>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            main_iterations: default_main_iterations(),
            sub_iterations: default_sub_iterations(),
            tolerance: default_tolerance(),
            global_weight: default_global_weight(),
            constraint_mode: ConstraintMode::default(),
            constraint_passes: default_constraint_passes(),
            rotation_damping: default_rotation_damping(),
            max_rotation_speed: default_max_rotation_speed(),
            root_pin_mode: RootPinMode::default(),
            pin_root: None,
        }
    }
}

impl SolverConfig {
    /// Validate configuration. Returns Err on out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=30).contains(&self.main_iterations) {
            return Err(ConfigError::invalid("main_iterations", "must be in 1..=30"));
        }
        if !(1..=10).contains(&self.sub_iterations) {
            return Err(ConfigError::invalid("sub_iterations", "must be in 1..=10"));
        }
        if !(1..=10).contains(&self.constraint_passes) {
            return Err(ConfigError::invalid("constraint_passes", "must be in 1..=10"));
        }
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::invalid("tolerance", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.global_weight) {
            return Err(ConfigError::invalid("global_weight", "must be in 0..=1"));
        }
        if !(0.0..=0.8).contains(&self.rotation_damping) {
            return Err(ConfigError::invalid("rotation_damping", "must be in 0..=0.8"));
        }
        if !(self.max_rotation_speed >= 0.0) {
            return Err(ConfigError::invalid("max_rotation_speed", "must be >= 0"));
        }
        Ok(())
    }

    /// Pin mode after applying the legacy `pin_root` switch.
    pub fn effective_pin_mode(&self) -> RootPinMode {
        match (self.pin_root, self.root_pin_mode) {
            (Some(false), RootPinMode::InitialPose) => RootPinMode::Free,
            (_, mode) => mode,
        }
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// A complete rig description: solver settings, effectors and constraint table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub effectors: Vec<EffectorDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

impl RigConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.solver.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
