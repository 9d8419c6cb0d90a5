//! Multi-chain coordinator.
//!
//! [`FullBodyIk`] owns the skeleton, the end-effectors and the constraint
//! table. Every [`solve`](FullBodyIk::solve) is one independent, best-effort
//! tick starting from the host pose:
//!
//! 1. outer rounds of per-chain FABRIK with shared-joint averaging,
//! 2. a single pole correction per effector,
//! 3. the constraint passes,
//! 4. the pose commit back into the host pose.

pub mod fabrik;
pub mod pole;

use std::cmp::Reverse;

use nalgebra::Vector3;
use tracing::{debug, error, info, warn};

use crate::chain::Chain;
use crate::config::{ConstraintMode, RigConfig, RootPinMode, SolverConfig};
use crate::constraint::{ConstraintDef, ConstraintSet};
use crate::effector::{EffectorDef, EndEffector};
use crate::error::{ConfigError, IkError};
use crate::pose::{self, CommitSettings};
use crate::skeleton::{Hierarchy, Skeleton};

use self::fabrik::BasePin;
use self::pole::PoleOutcome;

/// Largest change of any effector error between two rounds that still
/// counts as stalled.
pub const CONVERGENCE_EPSILON: f32 = 1e-3;

/// Outcome of one [`FullBodyIk::solve`] tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveReport {
    /// Every active effector ended within tolerance.
    pub converged: bool,
    /// Outer rounds run.
    pub iterations: u32,
    /// `(effector name, error)` for every active effector, in solve order.
    pub errors: Vec<(String, f32)>,
    pub poles_applied: usize,
    pub constraint_corrections: usize,
    /// Bones whose host rotation was written.
    pub bones_committed: usize,
}

impl SolveReport {
    /// Largest effector error, zero without active effectors.
    pub fn max_error(&self) -> f32 {
        self.errors.iter().fold(0.0, |max, (_, error)| max.max(*error))
    }
}

/// Full-body FABRIK solver.
#[derive(Debug, Clone)]
pub struct FullBodyIk {
    config: SolverConfig,
    skeleton: Skeleton,
    effectors: Vec<EndEffector>,
    constraint_defs: Vec<ConstraintDef>,
    constraints: ConstraintSet,
    initial_root_position: Vector3<f32>,
    root_pin_position: Vector3<f32>,
}

impl FullBodyIk {
    /// Build the skeleton from `hierarchy` and bind effectors and constraints.
    ///
    /// Effectors and constraint rows that name unknown bones are logged and
    /// skipped; only structural problems and invalid settings are errors.
    pub fn new(
        config: SolverConfig,
        hierarchy: &Hierarchy,
        effectors: Vec<EffectorDef>,
        constraints: &[ConstraintDef],
    ) -> Result<Self, IkError> {
        config.validate()?;
        let skeleton = Skeleton::build(hierarchy)?;
        Ok(Self::with_skeleton(config, skeleton, effectors, constraints))
    }

    pub fn from_rig(hierarchy: &Hierarchy, rig: &RigConfig) -> Result<Self, IkError> {
        Self::new(
            rig.solver.clone(),
            hierarchy,
            rig.effectors.clone(),
            &rig.constraints,
        )
    }

    fn with_skeleton(
        config: SolverConfig,
        mut skeleton: Skeleton,
        effectors: Vec<EffectorDef>,
        constraints: &[ConstraintDef],
    ) -> Self {
        let effectors: Vec<EndEffector> = effectors
            .into_iter()
            .map(|def| bind_effector(&skeleton, def))
            .collect();
        let constraint_set = ConstraintSet::resolve(&skeleton, constraints);
        skeleton.load_working_pose();
        let root_position = skeleton.world_position(skeleton.root());

        info!(
            bones = skeleton.len(),
            effectors = effectors.iter().filter(|e| e.is_active()).count(),
            constraints = constraint_set.len(),
            "full-body IK initialized"
        );
        Self {
            config,
            skeleton,
            effectors,
            constraint_defs: constraints.to_vec(),
            constraints: constraint_set,
            initial_root_position: root_position,
            root_pin_position: root_position,
        }
    }

    /// Rebuild against a new hierarchy, keeping effector definitions, targets
    /// and poles, and the constraint table.
    pub fn reinitialize(&mut self, hierarchy: &Hierarchy) -> Result<(), IkError> {
        let skeleton = Skeleton::build(hierarchy)?;
        let previous = std::mem::take(&mut self.effectors);
        let defs: Vec<EffectorDef> = previous.iter().map(|e| e.def.clone()).collect();
        let constraint_defs = std::mem::take(&mut self.constraint_defs);
        *self = Self::with_skeleton(self.config.clone(), skeleton, defs, &constraint_defs);
        for (effector, old) in self.effectors.iter_mut().zip(previous) {
            if old.bone().is_some() {
                effector.target = old.target;
            }
            effector.pole = old.pole;
        }
        Ok(())
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Replace the settings. The current ones are kept when validation fails.
    pub fn set_config(&mut self, config: SolverConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Host-side access, e.g. to play animation into the pose between ticks.
    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn effectors(&self) -> &[EndEffector] {
        &self.effectors
    }

    pub fn effector(&self, name: &str) -> Option<&EndEffector> {
        self.effectors.iter().find(|e| e.name() == name)
    }

    pub fn effector_mut(&mut self, name: &str) -> Option<&mut EndEffector> {
        self.effectors.iter_mut().find(|e| e.name() == name)
    }

    /// Move an effector's target. Returns `false` for an unknown effector.
    pub fn set_target(&mut self, name: &str, target: Vector3<f32>) -> bool {
        match self.effector_mut(name) {
            Some(effector) => {
                effector.set_target(target);
                true
            }
            None => {
                warn!(effector = name, "set_target on unknown effector");
                false
            }
        }
    }

    /// Move an effector's pole. Returns `false` for an unknown effector.
    pub fn set_pole(&mut self, name: &str, pole: Vector3<f32>) -> bool {
        match self.effector_mut(name) {
            Some(effector) => {
                effector.set_pole(pole);
                true
            }
            None => {
                warn!(effector = name, "set_pole on unknown effector");
                false
            }
        }
    }

    /// Where the skeleton root is held during the forward pass.
    pub fn root_pin_position(&self) -> Vector3<f32> {
        self.root_pin_position
    }

    /// Indices of active effectors, highest priority first, list order otherwise.
    fn solve_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.effectors.len())
            .filter(|&i| self.effectors[i].is_active())
            .collect();
        order.sort_by_key(|&i| Reverse(self.effectors[i].def.priority));
        order
    }

    fn update_root_pin(&mut self, mode: RootPinMode) {
        match mode {
            RootPinMode::InitialPose => self.root_pin_position = self.initial_root_position,
            RootPinMode::CurrentPose => {
                self.root_pin_position = self.skeleton.world_position(self.skeleton.root())
            }
            RootPinMode::Free => {}
        }
    }

    fn solve_effector(&mut self, index: usize, mode: RootPinMode) -> f32 {
        let effector = &self.effectors[index];
        let Some(chain) = effector.chain() else {
            return f32::MAX;
        };
        let Some(base) = chain.base() else {
            return f32::MAX;
        };
        let pin = if base != self.skeleton.root() {
            BasePin::Fixed(self.skeleton.bone(base).pre_iteration_position)
        } else if mode == RootPinMode::Free {
            BasePin::Free
        } else {
            BasePin::Fixed(self.root_pin_position)
        };
        fabrik::solve_chain(
            &mut self.skeleton,
            chain,
            effector.target,
            pin,
            self.config.sub_iterations,
        )
    }

    /// Run one tick and write the result into the skeleton's host pose.
    ///
    /// `dt` is the time since the previous tick in seconds and only feeds the
    /// rotation speed limit.
    pub fn solve(&mut self, dt: f32) -> SolveReport {
        let mut report = SolveReport::default();
        let order = self.solve_order();
        if order.is_empty() {
            debug!("no active effectors, nothing to solve");
            return report;
        }
        let mode = self.config.effective_pin_mode();
        self.update_root_pin(mode);
        self.skeleton.load_working_pose();

        let mut within_tolerance = false;
        for round in 0..self.config.main_iterations {
            self.skeleton.snapshot_pre_iteration();
            within_tolerance = true;
            let mut max_change = 0.0f32;
            for &index in &order {
                let error = self.solve_effector(index, mode);
                let effector = &mut self.effectors[index];
                max_change = max_change.max((error - effector.last_error()).abs());
                effector.set_last_error(error);
                within_tolerance &= error <= self.config.tolerance;
            }
            self.skeleton.resolve_accumulated();
            if self.config.constraint_mode == ConstraintMode::PostIteration {
                report.constraint_corrections += self
                    .constraints
                    .apply_passes(&mut self.skeleton, self.config.constraint_passes);
            }
            report.iterations = round + 1;
            if within_tolerance || max_change < CONVERGENCE_EPSILON {
                debug!(round = round + 1, within_tolerance, max_change, "outer loop done");
                break;
            }
        }
        report.converged = within_tolerance;

        for &index in &order {
            let effector = &self.effectors[index];
            let (Some(pole), Some(chain)) = (effector.active_pole(), effector.chain()) else {
                continue;
            };
            let outcome = pole::apply_pole(
                &mut self.skeleton,
                chain,
                pole,
                effector.def.pole_bone_index,
                effector.def.pole_weight.min(1.0),
            );
            debug!(effector = %effector.name(), ?outcome, "pole correction");
            if matches!(outcome, PoleOutcome::Applied { .. }) {
                report.poles_applied += 1;
            }
        }

        if self.config.constraint_mode != ConstraintMode::Disabled {
            report.constraint_corrections += self
                .constraints
                .apply_passes(&mut self.skeleton, self.config.constraint_passes);
        }

        let settings = CommitSettings::new(&self.config, dt);
        report.bones_committed = pose::commit_pose(
            &mut self.skeleton,
            order.iter().map(|&i| &self.effectors[i]),
            &settings,
        );
        if mode == RootPinMode::Free {
            self.commit_root_translation();
        }
        self.skeleton.forward_kinematics();
        self.skeleton.load_working_pose();

        report.errors = order
            .iter()
            .map(|&i| (self.effectors[i].name().to_owned(), self.effectors[i].last_error()))
            .collect();
        report
    }

    // Free pinning lets the root travel; carry the solved offset into the host pose.
    fn commit_root_translation(&mut self) {
        let root = self.skeleton.root();
        let host = self.skeleton.world_position(root);
        let solved = self.skeleton.bone(root).position;
        let position = host.lerp(&solved, self.config.global_weight);
        self.skeleton.set_root_position(position);
    }
}

fn bind_effector(skeleton: &Skeleton, def: EffectorDef) -> EndEffector {
    let Some(bone) = skeleton.find(&def.bone) else {
        error!(effector = %def.name, bone = %def.bone, "effector bone not found, effector skipped");
        return EndEffector::unresolved(def);
    };
    let chain = Chain::extract(skeleton, bone, def.chain_length);
    if chain.is_solvable() {
        info!(
            effector = %def.name,
            chain_length = chain.len(),
            reach = chain.max_reach(skeleton),
            "effector bound"
        );
    } else {
        warn!(effector = %def.name, bone = %def.bone, "chain has no bone segment, effector skipped");
    }
    let target = skeleton.world_position(bone);
    EndEffector::resolved(def, bone, chain, target)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skeleton::test::forked_hierarchy;
    use crate::skeleton::BoneDesc;
    use approx::assert_relative_eq;

    fn steady_config() -> SolverConfig {
        SolverConfig {
            rotation_damping: 0.0,
            max_rotation_speed: 0.0,
            ..SolverConfig::default()
        }
    }

    fn bent_arm() -> Hierarchy {
        Hierarchy::new()
            .bone(BoneDesc::new("shoulder", None, Vector3::zeros()))
            .bone(BoneDesc::new("elbow", Some("shoulder"), Vector3::new(0.5, 0.8660254, 0.0)))
            .bone(BoneDesc::new("wrist", Some("elbow"), Vector3::new(1.5, 0.8660254, 0.0)))
    }

    fn arm_ik(config: SolverConfig) -> FullBodyIk {
        FullBodyIk::new(config, &bent_arm(), vec![EffectorDef::new("hand", "wrist")], &[]).unwrap()
    }

    fn wrist_position(ik: &FullBodyIk) -> Vector3<f32> {
        let wrist = ik.skeleton().find("wrist").unwrap();
        ik.skeleton().world_position(wrist)
    }

    #[test]
    fn reachable_target_is_committed() {
        let mut ik = arm_ik(steady_config());
        let target = Vector3::new(1.2, 0.4, 0.5);
        assert!(ik.set_target("hand", target));

        let report = ik.solve(1.0 / 60.0);
        assert!(report.converged);
        assert!(report.iterations <= ik.config().main_iterations);
        assert_eq!(report.errors.len(), 1);
        assert!(report.max_error() <= ik.config().tolerance);
        assert_eq!(report.bones_committed, 2);
        assert!((wrist_position(&ik) - target).norm() <= ik.config().tolerance + 1e-4);

        let shoulder = ik.skeleton().root();
        assert_relative_eq!(ik.skeleton().world_position(shoulder), Vector3::zeros());
    }

    #[test]
    fn repeated_ticks_settle() {
        let mut ik = arm_ik(steady_config());
        ik.set_target("hand", Vector3::new(0.3, 1.2, -0.6));
        for _ in 0..3 {
            ik.solve(1.0 / 60.0);
        }
        let before: Vec<_> = ik.skeleton().bones().map(|(_, b)| b.world_position()).collect();
        ik.solve(1.0 / 60.0);
        for ((_, bone), old) in ik.skeleton().bones().zip(before) {
            assert!((bone.world_position() - old).norm() < 1e-2);
        }
    }

    #[test]
    fn initial_pose_pin_ignores_host_root_motion() {
        let mut ik = arm_ik(steady_config());
        ik.skeleton_mut().set_root_position(Vector3::new(0.0, 0.0, 1.0));
        let root = ik.skeleton().root();
        for target in [Vector3::new(1.2, 0.4, 0.5), Vector3::new(-10.0, 2.0, 1.0)] {
            ik.set_target("hand", target);
            ik.update_root_pin(RootPinMode::InitialPose);
            ik.skeleton.load_working_pose();
            ik.skeleton.snapshot_pre_iteration();
            ik.solve_effector(0, RootPinMode::InitialPose);
            ik.skeleton.resolve_accumulated();
            assert_eq!(ik.skeleton().bone(root).position, Vector3::zeros());

            ik.solve(1.0 / 60.0);
            assert_eq!(ik.root_pin_position(), Vector3::zeros());
        }
    }

    #[test]
    fn initial_pose_pin_holds_the_root_across_ticks() {
        let mut ik = arm_ik(steady_config());
        let root = ik.skeleton().root();
        for target in [Vector3::new(10.0, 0.0, 0.0), Vector3::new(0.0, -10.0, 3.0)] {
            ik.set_target("hand", target);
            ik.solve(1.0 / 60.0);
            assert_eq!(ik.skeleton().world_position(root), Vector3::zeros());
            assert_eq!(ik.skeleton().bone(root).position, Vector3::zeros());
        }
    }

    #[test]
    fn current_pose_pin_follows_host_root() {
        let mut ik = arm_ik(SolverConfig {
            root_pin_mode: RootPinMode::CurrentPose,
            ..steady_config()
        });
        let offset = Vector3::new(0.0, 0.0, 1.0);
        ik.skeleton_mut().set_root_position(offset);
        let target = Vector3::new(1.2, 0.4, 0.5) + offset;
        ik.set_target("hand", target);

        ik.solve(1.0 / 60.0);
        assert_eq!(ik.root_pin_position(), offset);
        let root = ik.skeleton().root();
        assert_relative_eq!(ik.skeleton().world_position(root), offset);
        assert!((wrist_position(&ik) - target).norm() <= ik.config().tolerance + 1e-4);
    }

    #[test]
    fn free_root_is_dragged_by_the_chain() {
        let mut ik = arm_ik(SolverConfig {
            pin_root: Some(false),
            ..steady_config()
        });
        let target = Vector3::new(10.0, 0.0, 0.0);
        ik.set_target("hand", target);

        let report = ik.solve(1.0 / 60.0);
        assert!(report.converged);
        let root = ik.skeleton().root();
        assert!(ik.skeleton().world_position(root).x > 5.0);
        assert_relative_eq!(wrist_position(&ik), target, epsilon = 1e-3);
    }

    #[test]
    fn unreachable_target_stalls_at_full_reach() {
        let mut ik = arm_ik(steady_config());
        ik.set_target("hand", Vector3::new(10.0, 0.0, 0.0));
        let report = ik.solve(1.0 / 60.0);
        assert!(!report.converged);
        assert!(report.iterations < ik.config().main_iterations);
        assert_relative_eq!(report.max_error(), 8.0, epsilon = 1e-2);
    }

    #[test]
    fn priority_orders_solving() {
        let ik = FullBodyIk::new(
            steady_config(),
            &forked_hierarchy(),
            vec![
                EffectorDef::new("a", "hand"),
                EffectorDef::new("b", "foot").priority(2),
                EffectorDef::new("c", "hand").priority(2),
                EffectorDef::new("d", "foot").enabled(false),
                EffectorDef::new("e", "ghost").priority(5),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(ik.solve_order(), vec![1, 2, 0]);
        assert!(!ik.effector("e").unwrap().is_active());
    }

    #[test]
    fn no_active_effector_leaves_pose_alone() {
        let mut ik = FullBodyIk::new(
            steady_config(),
            &bent_arm(),
            vec![EffectorDef::new("hand", "missing")],
            &[],
        )
        .unwrap();
        let before = wrist_position(&ik);
        let report = ik.solve(1.0 / 60.0);
        assert_eq!(report, SolveReport::default());
        assert_eq!(wrist_position(&ik), before);
        assert!(!ik.set_target("nobody", Vector3::zeros()));
    }

    #[test]
    fn forked_effectors_share_the_spine() {
        let mut ik = FullBodyIk::new(
            steady_config(),
            &forked_hierarchy(),
            vec![EffectorDef::new("hand", "hand"), EffectorDef::new("foot", "foot")],
            &[],
        )
        .unwrap();
        ik.set_target("hand", Vector3::new(1.5, 2.0, 0.5));
        ik.set_target("foot", Vector3::new(-1.5, 0.5, 0.5));
        let report = ik.solve(1.0 / 60.0);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|(_, e)| e.is_finite()));
        // both effectors end closer than where they started
        let [(_, hand), (_, foot)] = &report.errors[..] else {
            panic!("two errors expected");
        };
        assert!(*hand < 1.2, "hand error {hand}");
        assert!(*foot < 0.86, "foot error {foot}");
    }

    #[test]
    fn hinge_limit_holds_after_solve() {
        let elbow_hinge = ConstraintDef::hinge("elbow", [0.0, 0.0, 1.0], -30.0, 30.0);
        let mut ik = FullBodyIk::new(
            steady_config(),
            &bent_arm(),
            vec![EffectorDef::new("hand", "wrist")],
            &[elbow_hinge],
        )
        .unwrap();
        ik.set_target("hand", Vector3::new(0.6, 0.2, 0.0));
        let report = ik.solve(1.0 / 60.0);
        assert!(report.constraint_corrections >= 1);

        let skeleton = ik.skeleton();
        let elbow = skeleton.find("elbow").unwrap();
        let forearm = wrist_position(&ik) - skeleton.world_position(elbow);
        let angle = crate::geometry::signed_angle_deg(&Vector3::x(), &forearm, &Vector3::z());
        assert!(angle.abs() <= 30.0 + 1e-2, "angle {angle}");
    }

    #[test]
    fn post_iteration_mode_constrains_every_round() {
        let run = |constraint_mode: ConstraintMode| {
            let elbow_hinge = ConstraintDef::hinge("elbow", [0.0, 0.0, 1.0], -30.0, 30.0);
            let mut ik = FullBodyIk::new(
                SolverConfig {
                    constraint_mode,
                    sub_iterations: 1,
                    ..steady_config()
                },
                &bent_arm(),
                vec![EffectorDef::new("hand", "wrist")],
                &[elbow_hinge],
            )
            .unwrap();
            ik.set_target("hand", Vector3::new(0.6, 0.2, 0.0));
            let report = ik.solve(1.0 / 60.0);

            let skeleton = ik.skeleton();
            let elbow = skeleton.find("elbow").unwrap();
            let forearm = wrist_position(&ik) - skeleton.world_position(elbow);
            let angle = crate::geometry::signed_angle_deg(&Vector3::x(), &forearm, &Vector3::z());
            assert!(angle.abs() <= 30.0 + 1e-2, "{constraint_mode:?} angle {angle}");
            report
        };
        let after = run(ConstraintMode::AfterConvergence);
        let post = run(ConstraintMode::PostIteration);
        assert!(after.constraint_corrections >= 1);
        assert!(post.iterations >= 2);
        assert!(
            post.constraint_corrections > after.constraint_corrections,
            "post {} after {}",
            post.constraint_corrections,
            after.constraint_corrections
        );
    }

    #[test]
    fn disabled_constraints_are_not_applied() {
        let elbow_hinge = ConstraintDef::hinge("elbow", [0.0, 0.0, 1.0], -30.0, 30.0);
        let mut ik = FullBodyIk::new(
            SolverConfig {
                constraint_mode: ConstraintMode::Disabled,
                ..steady_config()
            },
            &bent_arm(),
            vec![EffectorDef::new("hand", "wrist")],
            &[elbow_hinge],
        )
        .unwrap();
        ik.set_target("hand", Vector3::new(0.6, 0.2, 0.0));
        let report = ik.solve(1.0 / 60.0);
        assert_eq!(report.constraint_corrections, 0);
        assert!(report.converged);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut ik = arm_ik(steady_config());
        let bad = SolverConfig {
            main_iterations: 0,
            ..steady_config()
        };
        assert!(ik.set_config(bad.clone()).is_err());
        assert_eq!(ik.config().main_iterations, 10);
        assert!(matches!(
            FullBodyIk::new(bad, &bent_arm(), vec![], &[]),
            Err(IkError::Config(_))
        ));
    }

    #[test]
    fn reinitialize_keeps_targets() {
        let mut ik = arm_ik(steady_config());
        let target = Vector3::new(1.2, 0.4, 0.5);
        ik.set_target("hand", target);
        ik.set_pole("hand", Vector3::z());
        ik.reinitialize(&bent_arm()).unwrap();
        let hand = ik.effector("hand").unwrap();
        assert_eq!(hand.target, target);
        assert_eq!(hand.pole, Some(Vector3::z()));
        assert_eq!(hand.last_error(), f32::MAX);
    }
}
