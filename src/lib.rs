//! # fbik is a full-body FABRIK inverse kinematics solver.
//! fbik = skeleton + multi-chain FABRIK + joint limits + stable pose commit
//!
//! ```no_run
//! use fbik::{EffectorDef, FullBodyIk, Hierarchy, SolverConfig};
//! use nalgebra::Vector3;
//!
//! let hierarchy = Hierarchy::from_urdf("arm.urdf")?;
//! let mut ik = FullBodyIk::new(
//!     SolverConfig::default(),
//!     &hierarchy,
//!     vec![EffectorDef::new("tool", "end_effector")],
//!     &[],
//! )?;
//! ik.set_target("tool", Vector3::new(0.2, 0.1, 0.4));
//! let report = ik.solve(1.0 / 60.0);
//! println!("converged: {} in {} rounds", report.converged, report.iterations);
//! # Ok::<(), fbik::IkError>(())
//! ```

// #![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod constraint;
pub mod effector;
mod error;
pub mod geometry;
pub mod pose;
pub mod presets;
pub mod skeleton;
pub mod solver;

pub use chain::Chain;
pub use config::{ConstraintMode, RigConfig, RootPinMode, SolverConfig};
pub use constraint::{ConstraintDef, ConstraintKind, ConstraintSet, JointConstraint};
pub use effector::{EffectorDef, EndEffector};
pub use error::{ConfigError, IkError};
pub use skeleton::{hinge_constraints_from_urdf, Bone, BoneDesc, BoneId, Hierarchy, Skeleton};
pub use solver::{FullBodyIk, SolveReport};
