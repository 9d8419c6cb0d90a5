//! Bone chains from a chain root down to an end-effector bone.

use crate::skeleton::{BoneId, Skeleton};

/// Ordered bone ids, oldest ancestor first, effector bone last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    bones: Vec<BoneId>,
}

impl Chain {
    /// Walk parent links from `end` up to the skeleton root.
    pub fn to_root(skeleton: &Skeleton, end: BoneId) -> Self {
        let mut bones = vec![];
        let mut current = Some(end);
        while let Some(id) = current {
            bones.push(id);
            current = skeleton.parent(id);
        }
        bones.reverse();
        Self { bones }
    }

    /// Walk at most `length` bones upward from `end` (the effector included).
    pub fn with_length(skeleton: &Skeleton, end: BoneId, length: usize) -> Self {
        let mut bones = vec![];
        let mut current = Some(end);
        while let Some(id) = current {
            if bones.len() >= length {
                break;
            }
            bones.push(id);
            current = skeleton.parent(id);
        }
        bones.reverse();
        Self { bones }
    }

    /// `chain_length == 0` extends the chain to the skeleton root.
    pub fn extract(skeleton: &Skeleton, end: BoneId, chain_length: usize) -> Self {
        if chain_length == 0 {
            Self::to_root(skeleton, end)
        } else {
            Self::with_length(skeleton, end, chain_length)
        }
    }

    pub fn bones(&self) -> &[BoneId] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// A chain needs at least one bone segment to be solved.
    pub fn is_solvable(&self) -> bool {
        self.bones.len() >= 2
    }

    pub fn base(&self) -> Option<BoneId> {
        self.bones.first().copied()
    }

    pub fn end(&self) -> Option<BoneId> {
        self.bones.last().copied()
    }

    /// Rest lengths of each bone relative to its predecessor; entry 0 is zero.
    pub fn lengths(&self, skeleton: &Skeleton) -> Vec<f32> {
        self.bones
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                if i == 0 {
                    0.0
                } else {
                    skeleton.bone(id).length_or_zero()
                }
            })
            .collect()
    }

    /// Sum of segment lengths: the farthest the tip can get from the base.
    pub fn max_reach(&self, skeleton: &Skeleton) -> f32 {
        self.lengths(skeleton).iter().sum()
    }

    pub fn contains(&self, id: BoneId) -> bool {
        self.bones.contains(&id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skeleton::test::forked_hierarchy;
    use approx::assert_relative_eq;

    fn names(skeleton: &Skeleton, chain: &Chain) -> Vec<String> {
        chain
            .bones()
            .iter()
            .map(|&id| skeleton.bone(id).name.clone())
            .collect()
    }

    #[test]
    fn chain_to_root_is_root_first() {
        let skeleton = Skeleton::build(&forked_hierarchy()).unwrap();
        let hand = skeleton.find("hand").unwrap();
        let chain = Chain::extract(&skeleton, hand, 0);
        assert_eq!(names(&skeleton, &chain), vec!["root", "spine", "arm", "hand"]);
        assert_eq!(chain.base(), Some(skeleton.root()));
        assert_eq!(chain.end(), Some(hand));
        assert_relative_eq!(chain.max_reach(&skeleton), 3.0);
        assert!(chain.contains(skeleton.find("spine").unwrap()));
        assert!(!chain.contains(skeleton.find("foot").unwrap()));
    }

    #[test]
    fn truncated_chain_keeps_effector() {
        let skeleton = Skeleton::build(&forked_hierarchy()).unwrap();
        let foot = skeleton.find("foot").unwrap();
        let chain = Chain::extract(&skeleton, foot, 2);
        assert_eq!(names(&skeleton, &chain), vec!["leg", "foot"]);
        assert!(chain.is_solvable());
        assert_eq!(chain.lengths(&skeleton), vec![0.0, 1.0]);
    }

    #[test]
    fn overlong_length_stops_at_root() {
        let skeleton = Skeleton::build(&forked_hierarchy()).unwrap();
        let foot = skeleton.find("foot").unwrap();
        let chain = Chain::extract(&skeleton, foot, 50);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn single_bone_chain_is_not_solvable() {
        let skeleton = Skeleton::build(&forked_hierarchy()).unwrap();
        let chain = Chain::extract(&skeleton, skeleton.root(), 0);
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_solvable());
    }
}
