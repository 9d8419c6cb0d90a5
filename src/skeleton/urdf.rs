//! Build a [`Hierarchy`] from a URDF robot description.
//!
//! Each link becomes a bone placed at its link frame origin. Joint origins
//! are composed from the root link outward.

use std::collections::HashMap;
use std::path::Path;

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;
use petgraph::Direction;
use tracing::debug;

use super::{BoneDesc, Hierarchy};
use crate::constraint::{ConstraintDef, ConstraintKind};
use crate::error::IkError;

impl Hierarchy {
    /// Read a URDF file and build its link hierarchy.
    pub fn from_urdf(path: impl AsRef<Path>) -> Result<Self, IkError> {
        let robot = urdf_rs::read_file(path)?;
        Self::from_robot(&robot)
    }

    /// Parse URDF XML content and build its link hierarchy.
    pub fn from_urdf_str(content: &str) -> Result<Self, IkError> {
        let robot = urdf_rs::read_from_string(content)?;
        Self::from_robot(&robot)
    }

    pub fn from_robot(robot: &urdf_rs::Robot) -> Result<Self, IkError> {
        // link name graph, edge weight = joint index
        let mut graph = DiGraphMap::<&str, usize>::new();
        for link in &robot.links {
            graph.add_node(link.name.as_str());
        }
        for (index, joint) in robot.joints.iter().enumerate() {
            graph.add_edge(joint.parent.link.as_str(), joint.child.link.as_str(), index);
        }

        let mut roots = robot
            .links
            .iter()
            .map(|link| link.name.as_str())
            .filter(|&name| {
                graph
                    .neighbors_directed(name, Direction::Incoming)
                    .next()
                    .is_none()
            });
        let root = roots.next().ok_or(IkError::MissingRoot)?;
        if let Some(second) = roots.next() {
            return Err(IkError::MultipleRoots {
                first: root.to_owned(),
                second: second.to_owned(),
            });
        }

        let mut global: HashMap<&str, Isometry3<f64>> = HashMap::new();
        let mut hierarchy = Hierarchy::new();
        let mut bfs = Bfs::new(&graph, root);
        while let Some(link) = bfs.next(&graph) {
            let parent = graph.neighbors_directed(link, Direction::Incoming).next();
            let pose = match parent {
                Some(parent) => {
                    let joint = &robot.joints[graph[(parent, link)]];
                    global[parent] * origin_to_isometry(&joint.origin)
                }
                None => Isometry3::identity(),
            };
            global.insert(link, pose);
            hierarchy.push(
                BoneDesc::new(link, parent, to_f32(&pose.translation.vector))
                    .with_rotation(rotation_to_f32(&pose.rotation)),
            );
        }
        debug!(robot = %robot.name, links = hierarchy.len(), "URDF hierarchy built");
        Ok(hierarchy)
    }
}

/// Hinge constraint rows for every limited revolute joint of a URDF robot.
///
/// The constraint is attached to the joint's child link, with the joint axis
/// in that link's frame and the limits converted to degrees.
pub fn hinge_constraints_from_urdf(robot: &urdf_rs::Robot) -> Vec<ConstraintDef> {
    robot
        .joints
        .iter()
        .filter(|joint| matches!(joint.joint_type, urdf_rs::JointType::Revolute))
        .filter(|joint| joint.limit.lower < joint.limit.upper)
        .map(|joint| {
            let axis = joint.axis.xyz.0;
            ConstraintDef {
                bone: joint.child.link.clone(),
                kind: ConstraintKind::Hinge {
                    axis: [axis[0] as f32, axis[1] as f32, axis[2] as f32],
                },
                min_angle: joint.limit.lower.to_degrees() as f32,
                max_angle: joint.limit.upper.to_degrees() as f32,
                strength: 1.0,
                enabled: true,
            }
        })
        .collect()
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

fn to_f32(v: &Vector3<f64>) -> Vector3<f32> {
    Vector3::new(v.x as f32, v.y as f32, v.z as f32)
}

fn rotation_to_f32(q: &UnitQuaternion<f64>) -> UnitQuaternion<f32> {
    let q = q.quaternion();
    UnitQuaternion::from_quaternion(Quaternion::new(
        q.w as f32, q.i as f32, q.j as f32, q.k as f32,
    ))
}
