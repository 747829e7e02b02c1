//! Worker threads.
//!
//! A worker owns a private copy of every node position and the adjacency of
//! the nodes in its partition. Each iteration it refreshes its copy from the
//! published frame, moves its own nodes one at a time (later nodes see the
//! earlier moves) and hands the results to the barrier.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::barrier::PhaseBarrier;
use crate::combine::{Frame, WorkerContribution};
use crate::partition::{Partitioner, Shard};
use crate::quadtree::{self, QuadTree};
use crate::schedule::StageParameters;
use crate::LayoutNode;

/// Repulsion strength relative to the unit attraction pull.
pub const REPULSION: f32 = 300.0;

pub type WorkerBarrier = PhaseBarrier<WorkerContribution, Frame>;

pub struct Worker {
    id: usize,
    partitioner: Partitioner,
    positions: Vec<LayoutNode>,
    shard: Shard,
    rng: StdRng,
    theta: f32,
}

impl Worker {
    pub fn new(
        id: usize,
        partitioner: Partitioner,
        positions: Vec<LayoutNode>,
        shard: Shard,
        seed: u64,
        theta: f32,
    ) -> Self {
        Self {
            id,
            partitioner,
            positions,
            shard,
            rng: StdRng::seed_from_u64(seed),
            theta,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Drive iterations until the barrier reports the end of the run.
    pub fn run(mut self, barrier: Arc<WorkerBarrier>, first: Arc<Frame>) {
        let _guard = barrier.panic_guard(self.id);
        let mut frame = first;
        loop {
            let contribution = self.iterate(&frame);
            match barrier.arrive(self.id, contribution) {
                Ok(Some(next)) => frame = next,
                Ok(None) => break,
                Err(e) => {
                    debug!(worker = self.id, error = %e, "openord_worker_aborted");
                    break;
                }
            }
        }
        debug!(worker = self.id, "openord_worker_exit");
    }

    /// One iteration over the owned nodes.
    pub fn iterate(&mut self, frame: &Frame) -> WorkerContribution {
        self.positions.clone_from(&frame.positions);
        for &(a, b) in &frame.cuts {
            self.shard.remove_edge(a, b);
            self.shard.remove_edge(b, a);
        }

        let n = self.positions.len();
        let partitioner = self.partitioner;
        let mut updates = Vec::with_capacity(partitioner.owned_count(self.id, n));
        let mut cut_requests = Vec::new();
        let mut displacement = 0.0;
        for index in partitioner.owned_indices(self.id, n) {
            displacement += self.update_node(index, &frame.params, frame.tree.as_ref());
            if let Some(request) = self.propose_cut(index, &frame.params) {
                cut_requests.push(request);
            }
            updates.push(self.positions[index as usize]);
        }

        WorkerContribution {
            worker_id: self.id,
            frame_iteration: frame.iteration,
            updates,
            cut_requests,
            displacement,
        }
    }

    /// Move one node; returns the distance moved.
    fn update_node(
        &mut self,
        index: u32,
        params: &StageParameters,
        tree: Option<&QuadTree>,
    ) -> f32 {
        let i = index as usize;
        let node = self.positions[i];
        let neighbors = self.shard.neighbors_of(index);
        // Nodes without neighbours receive no force and no jitter.
        if node.fixed || neighbors.is_empty() {
            return 0.0;
        }

        let (mut ax, mut ay, mut total) = (0.0f32, 0.0f32, 0.0f32);
        for (&j, &w) in neighbors {
            let other = &self.positions[j as usize];
            ax += w * (other.x - node.x);
            ay += w * (other.y - node.y);
            total += w.abs();
        }
        if total > 0.0 {
            ax *= params.attraction / total;
            ay *= params.attraction / total;
        }

        let (rx, ry) = self.repulsion(index, params, tree);
        let mut dx = params.damping * (ax + REPULSION * rx);
        let mut dy = params.damping * (ay + REPULSION * ry);

        let length = (dx * dx + dy * dy).sqrt();
        let max_step = params.max_step();
        if length > max_step {
            dx *= max_step / length;
            dy *= max_step / length;
        }

        let jitter = params.jitter();
        dx += (self.rng.random::<f32>() - 0.5) * jitter;
        dy += (self.rng.random::<f32>() - 0.5) * jitter;

        let target = &mut self.positions[i];
        target.x += dx;
        target.y += dy;
        (dx * dx + dy * dy).sqrt()
    }

    fn repulsion(
        &self,
        index: u32,
        params: &StageParameters,
        tree: Option<&QuadTree>,
    ) -> (f32, f32) {
        if let Some(tree) = tree {
            let theta = if params.fine { 0.0 } else { self.theta };
            return tree.repulsion_on(&self.positions, index, params.cutoff_radius, theta);
        }
        let me = self.positions[index as usize];
        let cutoff_sq = params.cutoff_radius * params.cutoff_radius;
        let (mut fx, mut fy) = (0.0, 0.0);
        for other in &self.positions {
            if other.index == index {
                continue;
            }
            if let Some((rx, ry)) = quadtree::repulsion(me.x - other.x, me.y - other.y, cutoff_sq)
            {
                fx += rx;
                fy += ry;
            }
        }
        (fx, fy)
    }

    /// Longest edge of a well-connected node, if it exceeds the cutoff.
    fn propose_cut(&self, index: u32, params: &StageParameters) -> Option<(u32, u32)> {
        let min_edges = params.min_edges?;
        let neighbors = self.shard.neighbors_of(index);
        if neighbors.len() < 2 || (neighbors.len() as u32) < min_edges {
            return None;
        }
        let me = self.positions[index as usize];
        let (far, length_sq) = neighbors
            .keys()
            .map(|&j| {
                let other = &self.positions[j as usize];
                (j, (other.x - me.x).powi(2) + (other.y - me.y).powi(2))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))?;
        (length_sq > params.cutoff_radius * params.cutoff_radius).then_some((index, far))
    }
}
