//! FABRIK passes over a single chain.
//!
//! Passes run on a scratch copy of the chain's working positions. Only the
//! result of the last sub-iteration is proposed to the shared skeleton, so
//! every chain contributes exactly one proposal per joint per outer round.

use nalgebra::Vector3;

use crate::chain::Chain;
use crate::geometry;
use crate::skeleton::Skeleton;

/// How the chain base is treated by the forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BasePin {
    /// Base is re-anchored to this position.
    Fixed(Vector3<f32>),
    /// Base stays where the backward pass left it and is proposed like any joint.
    Free,
}

/// Unit direction from `from` to `to`, or `fallback` when the points coincide.
fn direction(from: &Vector3<f32>, to: &Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    geometry::try_normalize(&(to - from)).unwrap_or(fallback)
}

/// Tip to base: put the tip on `target` and pull every joint toward its child.
///
/// `lengths[i]` is the rest distance between joint `i - 1` and joint `i`.
pub fn backward_pass(positions: &mut [Vector3<f32>], lengths: &[f32], target: Vector3<f32>) {
    let Some(last) = positions.len().checked_sub(1) else {
        return;
    };
    positions[last] = target;
    let mut fallback = -geometry::up();
    for i in (0..last).rev() {
        let dir = direction(&positions[i + 1], &positions[i], fallback);
        positions[i] = positions[i + 1] + dir * lengths[i + 1];
        fallback = dir;
    }
}

/// Base to tip: optionally re-anchor the base, then push every joint out to
/// its rest distance from its parent.
pub fn forward_pass(positions: &mut [Vector3<f32>], lengths: &[f32], base: Option<Vector3<f32>>) {
    if positions.is_empty() {
        return;
    }
    if let Some(base) = base {
        positions[0] = base;
    }
    let mut fallback = geometry::up();
    for i in 1..positions.len() {
        let dir = direction(&positions[i - 1], &positions[i], fallback);
        positions[i] = positions[i - 1] + dir * lengths[i];
        fallback = dir;
    }
}

/// Run `sub_iterations` FABRIK rounds on `chain` and record the result in the
/// skeleton's accumulators.
///
/// Returns the distance between the chain tip and `target` after the last
/// forward pass, or `f32::MAX` when the chain has no segment to solve.
pub fn solve_chain(
    skeleton: &mut Skeleton,
    chain: &Chain,
    target: Vector3<f32>,
    pin: BasePin,
    sub_iterations: u32,
) -> f32 {
    if !chain.is_solvable() {
        return f32::MAX;
    }
    let ids = chain.bones();
    let lengths = chain.lengths(skeleton);
    let mut positions: Vec<Vector3<f32>> = ids.iter().map(|&id| skeleton.bone(id).position).collect();

    let base = match pin {
        BasePin::Fixed(position) => Some(position),
        BasePin::Free => None,
    };
    for _ in 0..sub_iterations.max(1) {
        backward_pass(&mut positions, &lengths, target);
        forward_pass(&mut positions, &lengths, base);
    }

    match pin {
        BasePin::Fixed(position) => skeleton.bone_mut(ids[0]).position = position,
        BasePin::Free => skeleton.bone_mut(ids[0]).accumulate(positions[0]),
    }
    for (&id, &position) in ids.iter().zip(&positions).skip(1) {
        skeleton.bone_mut(id).accumulate(position);
    }

    positions
        .last()
        .map_or(f32::MAX, |tip| (tip - target).norm())
}
