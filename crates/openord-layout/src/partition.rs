//! Round-robin split of the adjacency data across workers.
//!
//! Node `i` belongs to worker `i % num_workers`. A worker's shard holds the
//! full normalized neighbour map of every node it owns and nothing else; the
//! reverse direction of an edge lives in the shard owning the other endpoint.

use crate::snapshot::GraphSnapshot;
use crate::{LayoutError, NeighborMap, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    num_workers: usize,
}

impl Partitioner {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Worker owning node `index`.
    pub fn owner(&self, index: u32) -> usize {
        index as usize % self.num_workers
    }

    /// Node indices owned by `worker`, ascending.
    pub fn owned_indices(&self, worker: usize, node_count: usize) -> impl Iterator<Item = u32> {
        (worker..node_count).step_by(self.num_workers).map(|i| i as u32)
    }

    /// Number of nodes owned by `worker`.
    pub fn owned_count(&self, worker: usize, node_count: usize) -> usize {
        if worker >= node_count {
            0
        } else {
            (node_count - worker).div_ceil(self.num_workers)
        }
    }

    /// Build the shard for `worker`.
    pub fn shard(&self, snapshot: &GraphSnapshot, worker: usize) -> Shard {
        let mut neighbors = vec![NeighborMap::default(); snapshot.node_count()];
        for index in self.owned_indices(worker, snapshot.node_count()) {
            let i = index as usize;
            if !snapshot.neighbors[i].is_empty() {
                neighbors[i] = snapshot.normalized_neighbors(i);
            }
        }
        Shard {
            worker_id: worker,
            neighbors,
        }
    }

    /// Build every shard, worker order.
    pub fn shards(&self, snapshot: &GraphSnapshot) -> Vec<Shard> {
        (0..self.num_workers)
            .map(|w| self.shard(snapshot, w))
            .collect()
    }

    /// Check that no shard holds a neighbour map for a node it does not own.
    pub fn verify(&self, shards: &[Shard]) -> Result<()> {
        for shard in shards {
            for (i, map) in shard.neighbors.iter().enumerate() {
                if !map.is_empty() && self.owner(i as u32) != shard.worker_id {
                    return Err(LayoutError::invariant(format!(
                        "worker {} holds adjacency of node {i} owned by worker {}",
                        shard.worker_id,
                        self.owner(i as u32)
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One worker's private slice of the adjacency data.
///
/// Indexed by node like the snapshot; maps of non-owned nodes stay empty.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    pub worker_id: usize,
    pub neighbors: Vec<NeighborMap>,
}

impl Shard {
    pub fn neighbors_of(&self, index: u32) -> &NeighborMap {
        &self.neighbors[index as usize]
    }

    /// Drop the `from -> to` direction if this shard holds it.
    pub fn remove_edge(&mut self, from: u32, to: u32) -> bool {
        self.neighbors
            .get_mut(from as usize)
            .and_then(|map| map.remove(&to))
            .is_some()
    }
}
