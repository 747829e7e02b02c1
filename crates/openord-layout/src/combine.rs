//! The merge step run by the barrier between iterations.
//!
//! Combine owns the authoritative position array. After every iteration it
//! checks that each worker wrote exactly the nodes it owns, copies those
//! values in, approves edge cuts, advances the iteration counter and decides
//! whether another iteration follows. The result is published as a [`Frame`]
//! that every worker copies into its private positions before continuing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::barrier::Release;
use crate::partition::Partitioner;
use crate::quadtree::QuadTree;
use crate::schedule::{Stage, StageParameters, StageSchedule};
use crate::snapshot::GraphSnapshot;
use crate::{LayoutError, LayoutNode, Result};

/// Depth cap for the Barnes-Hut index.
const TREE_DEPTH: usize = 12;

/// Progress counters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    pub iteration_index: u32,
    pub num_iterations: u32,
    pub running: bool,
    pub canceled: bool,
}

/// Everything a worker needs for the next iteration.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Completed iterations; also the iteration the frame is input to.
    pub iteration: u32,
    pub params: StageParameters,
    pub positions: Vec<LayoutNode>,
    pub tree: Option<QuadTree>,
    /// Edges removed by the last merge, as `(low, high)` index pairs.
    pub cuts: Vec<(u32, u32)>,
}

/// What one worker hands to the barrier.
#[derive(Debug, Clone, Default)]
pub struct WorkerContribution {
    pub worker_id: usize,
    /// Iteration of the frame the updates were computed from.
    pub frame_iteration: u32,
    /// New values of every owned node, ascending index.
    pub updates: Vec<LayoutNode>,
    pub cut_requests: Vec<(u32, u32)>,
    /// Sum of displacement lengths over owned nodes.
    pub displacement: f32,
}

pub struct Combine {
    partitioner: Partitioner,
    schedule: StageSchedule,
    positions: Vec<LayoutNode>,
    degrees: Vec<u32>,
    edges: FxHashSet<(u32, u32)>,
    state: SimulationState,
    stage: Stage,
    barnes_hut_threshold: usize,
    cancel: Arc<AtomicBool>,
}

impl Combine {
    pub fn new(
        snapshot: &GraphSnapshot,
        partitioner: Partitioner,
        schedule: StageSchedule,
        barnes_hut_threshold: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let mut edges = FxHashSet::default();
        for (u, map) in snapshot.neighbors.iter().enumerate() {
            for &v in map.keys() {
                edges.insert(edge_key(u as u32, v));
            }
        }
        let degrees = snapshot.neighbors.iter().map(|m| m.len() as u32).collect();
        let state = SimulationState {
            iteration_index: 0,
            num_iterations: schedule.num_iterations(),
            running: true,
            canceled: false,
        };
        Self {
            partitioner,
            stage: schedule.stage_at(0),
            schedule,
            positions: snapshot.nodes.clone(),
            degrees,
            edges,
            state,
            barnes_hut_threshold,
            cancel,
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn positions(&self) -> &[LayoutNode] {
        &self.positions
    }

    /// Frame for the first iteration.
    pub fn initial_frame(&self) -> Frame {
        self.frame(self.schedule.params_at(0), Vec::new(), true)
    }

    fn frame(&self, params: StageParameters, cuts: Vec<(u32, u32)>, with_tree: bool) -> Frame {
        let tree = (with_tree && self.positions.len() >= self.barnes_hut_threshold)
            .then(|| QuadTree::build(&self.positions, TREE_DEPTH));
        Frame {
            iteration: self.state.iteration_index,
            params,
            positions: self.positions.clone(),
            tree,
            cuts,
        }
    }

    /// Barrier action.
    pub fn merge(&mut self, contributions: Vec<WorkerContribution>) -> Release<Frame> {
        match self.try_merge(contributions) {
            Ok(release) => release,
            Err(e) => {
                error!(iteration = self.state.iteration_index, error = %e, "openord_merge_failed");
                self.state.running = false;
                Release::Failed(e)
            }
        }
    }

    fn try_merge(&mut self, contributions: Vec<WorkerContribution>) -> Result<Release<Frame>> {
        self.verify(&contributions)?;

        let mut displacement = 0.0;
        for contribution in &contributions {
            for update in &contribution.updates {
                self.positions[update.index as usize] = *update;
            }
            displacement += contribution.displacement;
        }
        let cuts = self.approve_cuts(&contributions);

        self.state.iteration_index += 1;
        let t = self.state.iteration_index;
        let params = self.schedule.params_at(t);
        debug!(
            iteration = t,
            stage = params.stage.label(),
            temperature = params.temperature,
            displacement,
            cuts = cuts.len(),
            "openord_iteration"
        );
        if params.stage != self.stage {
            info!(
                iteration = t,
                from = self.stage.label(),
                to = params.stage.label(),
                "openord_stage_change"
            );
            self.stage = params.stage;
        }

        if self.cancel.load(Ordering::Acquire) {
            self.state.running = false;
            self.state.canceled = true;
            info!(iteration = t, "openord_canceled");
            return Ok(Release::Finished(Arc::new(self.frame(params, cuts, false))));
        }
        if t >= self.state.num_iterations {
            self.state.running = false;
            info!(iterations = t, "openord_run_complete");
            return Ok(Release::Finished(Arc::new(self.frame(params, cuts, false))));
        }
        Ok(Release::Continue(Arc::new(self.frame(params, cuts, true))))
    }

    /// Every worker must report once, for the current iteration, writing
    /// exactly its owned indices.
    fn verify(&self, contributions: &[WorkerContribution]) -> Result<()> {
        let workers = self.partitioner.num_workers();
        if contributions.len() != workers {
            return Err(LayoutError::invariant(format!(
                "expected {workers} contributions, got {}",
                contributions.len()
            )));
        }
        let n = self.positions.len();
        for (w, contribution) in contributions.iter().enumerate() {
            if contribution.worker_id != w {
                return Err(LayoutError::invariant(format!(
                    "slot {w} holds the contribution of worker {}",
                    contribution.worker_id
                )));
            }
            if contribution.frame_iteration != self.state.iteration_index {
                return Err(LayoutError::invariant(format!(
                    "worker {w} computed from iteration {} during iteration {}",
                    contribution.frame_iteration, self.state.iteration_index
                )));
            }

            let mut expected = self.partitioner.owned_indices(w, n);
            for update in &contribution.updates {
                match expected.next() {
                    Some(i) if i == update.index => {}
                    Some(i) => {
                        return Err(LayoutError::invariant(format!(
                            "worker {w} wrote node {} where node {i} was expected",
                            update.index
                        )))
                    }
                    None => {
                        return Err(LayoutError::invariant(format!(
                            "worker {w} wrote node {} beyond its partition",
                            update.index
                        )))
                    }
                }
                if !update.x.is_finite() || !update.y.is_finite() {
                    return Err(LayoutError::invariant(format!(
                        "worker {w} produced a non-finite position for node {}",
                        update.index
                    )));
                }
            }
            if let Some(missing) = expected.next() {
                return Err(LayoutError::invariant(format!(
                    "worker {w} omitted owned node {missing}"
                )));
            }
        }
        Ok(())
    }

    /// Accept cut requests that name a live edge and leave both endpoints
    /// with at least one neighbour.
    fn approve_cuts(&mut self, contributions: &[WorkerContribution]) -> Vec<(u32, u32)> {
        let mut approved = Vec::new();
        for &(a, b) in contributions.iter().flat_map(|c| &c.cut_requests) {
            let key = edge_key(a, b);
            let (u, v) = (key.0 as usize, key.1 as usize);
            if self.degrees.get(u).copied().unwrap_or(0) <= 1
                || self.degrees.get(v).copied().unwrap_or(0) <= 1
            {
                continue;
            }
            if !self.edges.remove(&key) {
                continue;
            }
            self.degrees[u] -= 1;
            self.degrees[v] -= 1;
            approved.push(key);
        }
        approved
    }
}

fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
