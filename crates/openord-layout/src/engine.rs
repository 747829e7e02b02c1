//! Host-facing layout engine.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized --configure--> Initialized --init_algo--> Ready
//!      Ready --step--> Running --(budget or cancel)--> end_algo --> Stopped
//! ```
//!
//! `init_algo` snapshots the graph and builds workers but starts no threads;
//! the first `step` spawns one thread per worker. Every `step` then blocks
//! until the barrier publishes a frame newer than the last one it saw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use openord_core::{GraphModel, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::barrier::{Outcome, PhaseBarrier};
use crate::combine::{Combine, Frame, SimulationState};
use crate::config::OpenOrdConfig;
use crate::partition::Partitioner;
use crate::schedule::{Stage, StageSchedule};
use crate::snapshot::GraphSnapshot;
use crate::worker::{Worker, WorkerBarrier};
use crate::{LayoutError, LayoutNode, Result};

/// Lifecycle state of an [`OpenOrdLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    /// Configured, no run prepared.
    Initialized,
    /// Run prepared, threads not yet started.
    Ready,
    Running,
    Stopped,
}

/// Requests cooperative cancellation from any thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Takes effect at the next barrier release.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// State of one prepared run.
struct Run {
    node_ids: Vec<NodeId>,
    num_iterations: u32,
    barrier: Arc<WorkerBarrier>,
    pending: Vec<Worker>,
    first_frame: Arc<Frame>,
    handles: Vec<JoinHandle<()>>,
    /// Last barrier generation returned by `step`.
    observed: u64,
    /// Frame the host last observed. Observation accessors read this, so
    /// they only move when `step` or `end_algo` moves them.
    view: Arc<Frame>,
    finished: bool,
    failure: Option<LayoutError>,
}

/// Multi-threaded OpenOrd layout.
pub struct OpenOrdLayout {
    config: OpenOrdConfig,
    graph: Option<Arc<GraphModel>>,
    state: EngineState,
    cancel: Arc<AtomicBool>,
    run: Option<Run>,
}

impl Default for OpenOrdLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOrdLayout {
    pub fn new() -> Self {
        Self {
            config: OpenOrdConfig::default(),
            graph: None,
            state: EngineState::Uninitialized,
            cancel: Arc::new(AtomicBool::new(false)),
            run: None,
        }
    }

    /// Engine configured with `config` and bound to `graph`.
    pub fn with_graph(graph: Arc<GraphModel>, config: OpenOrdConfig) -> Result<Self> {
        let mut layout = Self::new();
        layout.set_graph_model(graph)?;
        layout.configure(config)?;
        Ok(layout)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &OpenOrdConfig {
        &self.config
    }

    pub fn set_graph_model(&mut self, graph: Arc<GraphModel>) -> Result<()> {
        self.require_idle("set the graph model")?;
        self.graph = Some(graph);
        Ok(())
    }

    /// Validate and store `config`. Out-of-range `edge_cut` is rejected; low
    /// thread and iteration counts are raised to their floors.
    pub fn configure(&mut self, config: OpenOrdConfig) -> Result<()> {
        self.require_idle("configure")?;
        self.config = config.sanitized()?;
        self.state = EngineState::Initialized;
        Ok(())
    }

    /// Restore every property to its default.
    pub fn reset_properties_values(&mut self) -> Result<()> {
        self.configure(OpenOrdConfig::default())
    }

    fn require_idle(&self, operation: &'static str) -> Result<()> {
        match self.state {
            EngineState::Ready | EngineState::Running => Err(LayoutError::InvalidState {
                operation,
                state: self.state,
            }),
            _ => Ok(()),
        }
    }

    /// Snapshot the graph and prepare workers, barrier and schedule.
    pub fn init_algo(&mut self) -> Result<()> {
        match self.state {
            EngineState::Initialized | EngineState::Stopped => {}
            state => {
                return Err(LayoutError::InvalidState {
                    operation: "initialize",
                    state,
                })
            }
        }
        let graph = self.graph.clone().ok_or(LayoutError::GraphNotSet)?;
        let snapshot = GraphSnapshot::load(&graph, self.config.reset_position)?;
        snapshot.attach_layout_handles(&graph);

        let config = &self.config;
        let partitioner = Partitioner::new(config.num_threads);
        let shards = partitioner.shards(&snapshot);
        partitioner.verify(&shards)?;
        let schedule = StageSchedule::new(config.num_iterations, config.edge_cut);

        self.cancel.store(false, Ordering::Release);
        let combine = Combine::new(
            &snapshot,
            partitioner,
            schedule,
            config.barnes_hut_threshold,
            Arc::clone(&self.cancel),
        );
        let first_frame = Arc::new(combine.initial_frame());
        let mut combine = combine;
        let barrier = Arc::new(PhaseBarrier::new(
            partitioner.num_workers(),
            Arc::clone(&first_frame),
            move |contributions| combine.merge(contributions),
        ));

        let pending = shards
            .into_iter()
            .enumerate()
            .map(|(w, shard)| {
                Worker::new(
                    w,
                    partitioner,
                    snapshot.nodes.clone(),
                    shard,
                    config.seed_policy.seed_for(config.rand_seed, w),
                    config.theta,
                )
            })
            .collect();

        info!(
            nodes = snapshot.node_count(),
            workers = partitioner.num_workers(),
            iterations = config.num_iterations,
            edge_cut = config.edge_cut,
            seed_policy = ?config.seed_policy,
            "openord_init"
        );

        self.run = Some(Run {
            node_ids: snapshot.node_ids,
            num_iterations: config.num_iterations,
            barrier,
            pending,
            view: Arc::clone(&first_frame),
            first_frame,
            handles: Vec::new(),
            observed: 0,
            finished: false,
            failure: None,
        });
        self.state = EngineState::Ready;
        Ok(())
    }

    /// One driving tick. The first call starts the worker threads; every call
    /// waits for the next published frame. Once the run has ended this
    /// returns immediately without changing anything.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            EngineState::Ready => {
                if self.cancel.load(Ordering::Acquire) {
                    if let Some(run) = self.run.as_mut() {
                        run.finished = true;
                    }
                    self.state = EngineState::Running;
                    return Ok(());
                }
                self.state = EngineState::Running;
                self.spawn_workers()?;
            }
            EngineState::Running => {}
            EngineState::Stopped => return Ok(()),
            state => {
                return Err(LayoutError::InvalidState {
                    operation: "step",
                    state,
                })
            }
        }

        let run = self.run.as_mut().ok_or(LayoutError::InvalidState {
            operation: "step",
            state: self.state,
        })?;
        if run.finished {
            return match &run.failure {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
        }

        let observed = run.barrier.observe_after(run.observed);
        run.observed = observed.generation;
        run.view = observed.frame;
        match observed.outcome {
            Outcome::Active => Ok(()),
            Outcome::Finished => {
                run.finished = true;
                Ok(())
            }
            Outcome::Failed(error) => {
                run.finished = true;
                run.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    fn spawn_workers(&mut self) -> Result<()> {
        let Some(run) = self.run.as_mut() else {
            return Err(LayoutError::InvalidState {
                operation: "start workers",
                state: self.state,
            });
        };
        for worker in run.pending.drain(..) {
            let id = worker.id();
            let barrier = Arc::clone(&run.barrier);
            let first = Arc::clone(&run.first_frame);
            let spawned = std::thread::Builder::new()
                .name(format!("openord-worker-{id}"))
                .spawn(move || worker.run(barrier, first));
            match spawned {
                Ok(handle) => run.handles.push(handle),
                Err(e) => {
                    let error = LayoutError::ThreadSpawn {
                        message: e.to_string(),
                    };
                    run.barrier.fail(error.clone());
                    run.finished = true;
                    run.failure = Some(error.clone());
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// True until `step` observes the end of the run, or until a cancel is
    /// requested.
    pub fn is_running(&self) -> bool {
        match (&self.state, &self.run) {
            (EngineState::Ready | EngineState::Running, Some(run)) => {
                !run.finished && !self.cancel.load(Ordering::Acquire)
            }
            _ => false,
        }
    }

    /// Request cancellation; observed at the next barrier release.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Stop the run, join the workers and write the final positions back to
    /// the graph. A run that failed is not written back; its error is
    /// returned instead.
    pub fn end_algo(&mut self) -> Result<()> {
        match self.state {
            EngineState::Ready | EngineState::Running => {}
            state => {
                return Err(LayoutError::InvalidState {
                    operation: "end",
                    state,
                })
            }
        }
        self.state = EngineState::Stopped;
        let Some(run) = self.run.as_mut() else {
            return Ok(());
        };

        if run.barrier.outcome() == Outcome::Active {
            self.cancel.store(true, Ordering::Release);
        }
        let mut failure = run.failure.clone();
        for (worker, handle) in run.handles.drain(..).enumerate() {
            if handle.join().is_err() && failure.is_none() {
                failure = Some(LayoutError::WorkerPanicked { worker });
            }
        }
        if let Outcome::Failed(error) = run.barrier.outcome() {
            failure.get_or_insert(error);
        }
        run.finished = true;
        run.view = run.barrier.latest();

        if let Some(error) = failure {
            warn!(error = %error, "openord_run_failed");
            return Err(error);
        }
        let graph = self.graph.as_ref().ok_or(LayoutError::GraphNotSet)?;
        write_back(graph, run);
        Ok(())
    }

    /// Positions of the frame the last `step` observed.
    pub fn positions(&self) -> Option<Vec<LayoutNode>> {
        self.run.as_ref().map(|run| run.view.positions.clone())
    }

    /// Completed iterations of the current run.
    pub fn iteration(&self) -> u32 {
        self.run.as_ref().map_or(0, |run| run.view.iteration)
    }

    pub fn stage(&self) -> Option<Stage> {
        self.run.as_ref().map(|run| run.view.params.stage)
    }

    /// Fraction of the iteration budget completed, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.run.as_ref().map_or(0.0, |run| {
            run.view.iteration as f32 / run.num_iterations.max(1) as f32
        })
    }

    pub fn simulation_state(&self) -> Option<SimulationState> {
        self.run.as_ref().map(|run| SimulationState {
            iteration_index: run.view.iteration,
            num_iterations: run.num_iterations,
            running: self.is_running(),
            canceled: self.cancel.load(Ordering::Acquire),
        })
    }
}

/// Copy the final frame onto the host nodes under the write lock. Fixed
/// nodes keep their host position.
fn write_back(graph: &GraphModel, run: &Run) {
    let frame = &run.view;
    let mut data = graph.write();
    let mut written = 0usize;
    for (node, id) in frame.positions.iter().zip(&run.node_ids) {
        if let Some(host) = data.node_mut(*id) {
            if !host.fixed {
                host.x = node.x;
                host.y = node.y;
                written += 1;
            }
        }
    }
    info!(nodes = written, iteration = frame.iteration, "openord_write_back");
}

impl Drop for OpenOrdLayout {
    fn drop(&mut self) {
        if let Some(run) = self.run.as_mut() {
            self.cancel.store(true, Ordering::Release);
            for handle in run.handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
