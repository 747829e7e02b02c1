//! Multi-threaded OpenOrd force-directed graph layout.
//!
//! This crate computes 2D coordinates for a weighted graph with a staged
//! force simulation (liquid, expansion, cooldown, crunch, simmer). The work
//! is split across worker threads that run in lockstep; between iterations
//! a single merge step reconciles their results into one authoritative
//! layout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   init_algo (read lock)                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ GraphModel  │───▶│  Snapshot   │───▶│ Partitioner │     │
//! │  │   (host)    │    │ (indices)   │    │  (shards)   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Worker threads (parallel)                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  Worker 0   │    │  Worker 1   │    │  Worker N   │     │
//! │  │ owns i%N==0 │    │ owns i%N==1 │    │    ...      │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ PhaseBarrier
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Combine (single-threaded)                  │
//! │  merge owned updates, approve cuts, advance StageSchedule,  │
//! │  publish the next Frame or finish                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                end_algo (write lock)                        │
//! │  Final positions copied back to the host nodes              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use openord_core::{GraphData, GraphModel, NodeId};
//! use openord_layout::{run_to_completion, OpenOrdConfig, OpenOrdLayout};
//!
//! let mut data = GraphData::new();
//! for id in 0..3 {
//!     data.add_node(NodeId(id)).unwrap();
//! }
//! data.add_edge(NodeId(0), NodeId(1), 1.0).unwrap();
//! data.add_edge(NodeId(1), NodeId(2), 1.0).unwrap();
//!
//! let graph = Arc::new(GraphModel::new(data));
//! let mut layout = OpenOrdLayout::with_graph(graph.clone(), OpenOrdConfig::default()).unwrap();
//! run_to_completion(&mut layout).unwrap();
//! ```

mod barrier;
mod combine;
mod config;
mod engine;
mod error;
mod partition;
mod quadtree;
mod schedule;
mod snapshot;
mod task;
mod worker;

use serde::{Deserialize, Serialize};

pub use barrier::{Observed, Outcome, PhaseBarrier, Release};
pub use combine::{Combine, Frame, SimulationState, WorkerContribution};
pub use config::{
    LayoutProperty, OpenOrdConfig, PropertyKind, PropertyValue, SeedPolicy, MIN_ITERATIONS,
};
pub use engine::{CancelHandle, EngineState, OpenOrdLayout};
pub use error::LayoutError;
pub use partition::{Partitioner, Shard};
pub use quadtree::{QuadCell, QuadTree};
pub use schedule::{Stage, StageParameters, StageSchedule};
pub use snapshot::{normalize_weight, GraphSnapshot};
pub use task::{run_to_completion, LayoutAlgorithm};
pub use worker::{Worker, REPULSION};

/// Result type for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;

/// Normalized edge weights keyed by neighbour index.
pub type NeighborMap = rustc_hash::FxHashMap<u32, f32>;

/// Position of one node, addressed by its dense index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    pub fixed: bool,
}

impl LayoutNode {
    pub fn new(index: u32, x: f32, y: f32) -> Self {
        Self {
            index,
            x,
            y,
            fixed: false,
        }
    }
}
