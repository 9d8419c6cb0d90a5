//! Skeleton model: an arena of bones linked by parent handles.
//!
//! The skeleton keeps two views of every bone. The *host pose* (local
//! translation/rotation and the derived world transform) mirrors what the
//! animation system renders. The *working pose* (position, rotation and the
//! shared accumulator) is scratch state the solver mutates during a tick.

mod urdf;

use std::collections::HashMap;

use nalgebra::{UnitQuaternion, Vector3};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Dfs};
use petgraph::Direction;
use tracing::{debug, info};

use crate::error::IkError;
use crate::geometry::{self, EPSILON};

pub use self::urdf::hinge_constraints_from_urdf;

/// Handle of a bone inside a [`Skeleton`].
pub type BoneId = NodeIndex;

/// One bone of an external hierarchy, in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneDesc {
    pub name: String,
    pub parent: Option<String>,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl BoneDesc {
    pub fn new(name: impl Into<String>, parent: Option<&str>, position: Vector3<f32>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_owned),
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Flat description of a bone tree. Bones may be listed in any order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hierarchy {
    bones: Vec<BoneDesc>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bone: BoneDesc) {
        self.bones.push(bone);
    }

    /// Builder form of [`push`](Self::push).
    pub fn bone(mut self, bone: BoneDesc) -> Self {
        self.bones.push(bone);
        self
    }

    pub fn bones(&self) -> &[BoneDesc] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

impl FromIterator<BoneDesc> for Hierarchy {
    fn from_iter<I: IntoIterator<Item = BoneDesc>>(iter: I) -> Self {
        Self {
            bones: iter.into_iter().collect(),
        }
    }
}

/// A bone record.
#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,

    // host pose
    local_translation: Vector3<f32>,
    local_rotation: UnitQuaternion<f32>,
    world_position: Vector3<f32>,
    world_rotation: UnitQuaternion<f32>,

    /// Working position for the current solve.
    pub position: Vector3<f32>,
    /// Working orientation for the current solve.
    pub rotation: UnitQuaternion<f32>,
    /// Orientation committed on the previous tick, used for damping.
    pub last_rotation: UnitQuaternion<f32>,
    /// Position at the start of the current outer round.
    pub pre_iteration_position: Vector3<f32>,

    accum: Vector3<f32>,
    accum_count: u32,

    // rest pose, fixed after build
    length: Option<f32>,
    rest_rotation: UnitQuaternion<f32>,
    rest_local_direction: Vector3<f32>,
    rest_world_direction: Vector3<f32>,
    depth: usize,
}

impl Bone {
    fn from_desc(desc: &BoneDesc) -> Self {
        Self {
            name: desc.name.clone(),
            local_translation: desc.position,
            local_rotation: desc.rotation,
            world_position: desc.position,
            world_rotation: desc.rotation,
            position: desc.position,
            rotation: desc.rotation,
            last_rotation: desc.rotation,
            pre_iteration_position: desc.position,
            accum: Vector3::zeros(),
            accum_count: 0,
            length: None,
            rest_rotation: desc.rotation,
            rest_local_direction: Vector3::zeros(),
            rest_world_direction: Vector3::zeros(),
            depth: 0,
        }
    }

    /// Rest distance to the parent. `None` for the root.
    pub fn length(&self) -> Option<f32> {
        self.length
    }

    pub(crate) fn length_or_zero(&self) -> f32 {
        self.length.unwrap_or(0.0)
    }

    pub fn is_root(&self) -> bool {
        self.length.is_none()
    }

    /// Rest-pose unit direction from the parent to this bone, world frame.
    pub fn rest_world_direction(&self) -> Vector3<f32> {
        self.rest_world_direction
    }

    /// Rest-pose unit direction from the parent to this bone, parent frame.
    pub fn rest_local_direction(&self) -> Vector3<f32> {
        self.rest_local_direction
    }

    pub fn rest_rotation(&self) -> UnitQuaternion<f32> {
        self.rest_rotation
    }

    pub fn world_position(&self) -> Vector3<f32> {
        self.world_position
    }

    pub fn world_rotation(&self) -> UnitQuaternion<f32> {
        self.world_rotation
    }

    pub fn local_rotation(&self) -> UnitQuaternion<f32> {
        self.local_rotation
    }

    /// Number of edges between this bone and the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record one chain's proposal for this bone's position.
    pub fn accumulate(&mut self, proposal: Vector3<f32>) {
        self.accum += proposal;
        self.accum_count += 1;
    }

    pub fn accumulated_count(&self) -> u32 {
        self.accum_count
    }

    /// Replace the working position by the mean of the recorded proposals.
    ///
    /// Returns `false` and leaves the position alone when nothing was recorded.
    pub fn resolve_accumulated(&mut self) -> bool {
        if self.accum_count == 0 {
            return false;
        }
        self.position = self.accum / self.accum_count as f32;
        self.clear_accumulator();
        true
    }

    pub fn clear_accumulator(&mut self) {
        self.accum = Vector3::zeros();
        self.accum_count = 0;
    }
}

/// Bone tree built once from a [`Hierarchy`].
#[derive(Debug, Clone)]
pub struct Skeleton {
    graph: DiGraph<Bone, ()>,
    names: HashMap<String, BoneId>,
    root: BoneId,
    // root first, every parent before its children
    order: Vec<BoneId>,
}

impl Skeleton {
    /// Build the bone tree and record rest lengths and directions.
    pub fn build(hierarchy: &Hierarchy) -> Result<Self, IkError> {
        let mut graph = DiGraph::with_capacity(hierarchy.len(), hierarchy.len());
        let mut names = HashMap::with_capacity(hierarchy.len());

        for desc in hierarchy.bones() {
            if names.contains_key(&desc.name) {
                return Err(IkError::DuplicateBone(desc.name.clone()));
            }
            let id = graph.add_node(Bone::from_desc(desc));
            names.insert(desc.name.clone(), id);
        }

        let mut root: Option<BoneId> = None;
        for desc in hierarchy.bones() {
            let id = names[&desc.name];
            match &desc.parent {
                Some(parent) => {
                    let Some(&parent_id) = names.get(parent) else {
                        return Err(IkError::UnknownParent {
                            bone: desc.name.clone(),
                            parent: parent.clone(),
                        });
                    };
                    graph.add_edge(parent_id, id, ());
                }
                None => {
                    if let Some(first) = root {
                        return Err(IkError::MultipleRoots {
                            first: graph[first].name.clone(),
                            second: desc.name.clone(),
                        });
                    }
                    root = Some(id);
                }
            }
        }
        let root = root.ok_or(IkError::MissingRoot)?;

        let mut order = Vec::with_capacity(graph.node_count());
        let mut bfs = Bfs::new(&graph, root);
        while let Some(id) = bfs.next(&graph) {
            order.push(id);
        }
        if order.len() < graph.node_count() {
            return Err(IkError::Disconnected(graph.node_count() - order.len()));
        }

        let mut skeleton = Self {
            graph,
            names,
            root,
            order,
        };
        skeleton.compute_rest_data();
        info!(
            bones = skeleton.len(),
            root = %skeleton.graph[root].name,
            "skeleton built"
        );
        Ok(skeleton)
    }

    fn compute_rest_data(&mut self) {
        for index in 1..self.order.len() {
            let id = self.order[index];
            let Some(parent_id) = self.parent(id) else {
                continue;
            };
            let parent = &self.graph[parent_id];
            let (parent_position, parent_rotation, parent_depth) =
                (parent.world_position, parent.world_rotation, parent.depth);

            let bone = &self.graph[id];
            let offset = bone.world_position - parent_position;
            let world_direction = match geometry::try_normalize(&offset) {
                Some(direction) => direction,
                None => {
                    let direction = coincident_direction(&parent_rotation);
                    debug!(
                        bone = %bone.name,
                        "coincident with parent at rest, using fallback direction"
                    );
                    direction
                }
            };
            let inverse = parent_rotation.inverse();
            let local_translation = inverse * offset;
            let local_rotation = inverse * bone.world_rotation;

            let bone = &mut self.graph[id];
            bone.length = Some(offset.norm());
            bone.rest_world_direction = world_direction;
            bone.rest_local_direction = inverse * world_direction;
            bone.local_translation = local_translation;
            bone.local_rotation = local_rotation;
            bone.depth = parent_depth + 1;
        }
    }

    pub fn root(&self) -> BoneId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn find(&self, name: &str) -> Option<BoneId> {
        self.names.get(name).copied()
    }

    pub fn bone(&self, id: BoneId) -> &Bone {
        &self.graph[id]
    }

    pub fn bone_mut(&mut self, id: BoneId) -> &mut Bone {
        &mut self.graph[id]
    }

    pub fn parent(&self, id: BoneId) -> Option<BoneId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Children in the order they were listed in the hierarchy.
    pub fn children(&self, id: BoneId) -> Vec<BoneId> {
        // petgraph lists neighbors in reverse order of edge insertion
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .collect();
        children.reverse();
        children
    }

    /// All bones below `id` in depth-first pre-order, excluding `id`.
    pub fn descendants(&self, id: BoneId) -> Vec<BoneId> {
        let mut dfs = Dfs::new(&self.graph, id);
        let mut out = Vec::new();
        while let Some(next) = dfs.next(&self.graph) {
            if next != id {
                out.push(next);
            }
        }
        out
    }

    /// Bone ids with every parent before its children.
    pub fn order(&self) -> &[BoneId] {
        &self.order
    }

    pub fn bones(&self) -> impl Iterator<Item = (BoneId, &Bone)> {
        self.order.iter().map(|&id| (id, &self.graph[id]))
    }

    pub fn world_position(&self, id: BoneId) -> Vector3<f32> {
        self.graph[id].world_position
    }

    pub fn world_rotation(&self, id: BoneId) -> UnitQuaternion<f32> {
        self.graph[id].world_rotation
    }

    /// Set a bone's host world rotation, keeping its children's local transforms.
    pub fn set_world_rotation(&mut self, id: BoneId, rotation: UnitQuaternion<f32>) {
        let local = match self.parent(id) {
            Some(parent) => self.graph[parent].world_rotation.inverse() * rotation,
            None => rotation,
        };
        let bone = &mut self.graph[id];
        bone.local_rotation = local;
        bone.world_rotation = rotation;
        self.update_subtree(id);
    }

    /// Move the root in the host pose, dragging the whole tree with it.
    pub fn set_root_position(&mut self, position: Vector3<f32>) {
        let root = self.root;
        let bone = &mut self.graph[root];
        bone.local_translation = position;
        bone.world_position = position;
        self.update_subtree(root);
    }

    /// Set the local rotation of a bone in the host pose, as an animator would.
    pub fn set_local_rotation(&mut self, id: BoneId, rotation: UnitQuaternion<f32>) {
        self.graph[id].local_rotation = rotation;
        match self.parent(id) {
            Some(parent) => self.update_bone(parent, id),
            None => self.graph[id].world_rotation = rotation,
        }
        self.update_subtree(id);
    }

    /// Recompute every world transform from local transforms, root first.
    pub fn forward_kinematics(&mut self) {
        let root = self.root;
        let bone = &mut self.graph[root];
        bone.world_position = bone.local_translation;
        bone.world_rotation = bone.local_rotation;
        self.update_subtree(root);
    }

    fn update_subtree(&mut self, id: BoneId) {
        let mut bfs = Bfs::new(&self.graph, id);
        while let Some(next) = bfs.next(&self.graph) {
            for child in self.children(next) {
                self.update_bone(next, child);
            }
        }
    }

    fn update_bone(&mut self, parent: BoneId, id: BoneId) {
        let parent = &self.graph[parent];
        let (position, rotation) = (parent.world_position, parent.world_rotation);
        let bone = &mut self.graph[id];
        bone.world_position = position + rotation * bone.local_translation;
        bone.world_rotation = rotation * bone.local_rotation;
    }

    /// Copy the host pose into the working pose and clear accumulators.
    pub fn load_working_pose(&mut self) {
        for bone in self.graph.node_weights_mut() {
            bone.position = bone.world_position;
            bone.rotation = bone.world_rotation;
            bone.clear_accumulator();
        }
    }

    /// Remember every working position as the start of an outer round.
    pub fn snapshot_pre_iteration(&mut self) {
        for bone in self.graph.node_weights_mut() {
            bone.pre_iteration_position = bone.position;
        }
    }

    /// Average the accumulated chain proposals into working positions.
    ///
    /// Returns how many bones received at least one proposal.
    pub fn resolve_accumulated(&mut self) -> usize {
        self.graph
            .node_weights_mut()
            .map(|bone| bone.resolve_accumulated())
            .filter(|&resolved| resolved)
            .count()
    }
}

/// Direction used when a bone coincides with its parent at rest: orthogonal
/// to the parent's forward axis, built from whichever of its up/right axes
/// is not (nearly) vertical.
fn coincident_direction(parent_rotation: &UnitQuaternion<f32>) -> Vector3<f32> {
    let forward = parent_rotation * geometry::forward();
    let up = parent_rotation * geometry::up();
    let reference = if up.dot(&geometry::up()).abs() > 0.95 {
        parent_rotation * geometry::right()
    } else {
        up
    };
    let direction = forward.cross(&reference);
    if direction.norm_squared() < EPSILON {
        geometry::orthogonal(&forward).into_inner()
    } else {
        direction.normalize()
    }
}
