//! Index-based copy of a host graph taken under its read lock.

use openord_core::{GraphModel, LayoutData, NodeId};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::{LayoutError, LayoutNode, NeighborMap, Result};

/// Scale a raw weight by the strongest tie and square it, keeping the sign.
///
/// `normalize(0) == 0`, and the mapping is monotone for non-negative weights.
pub fn normalize_weight(weight: f32, highest_similarity: f32) -> f32 {
    let scaled = weight / highest_similarity;
    scaled * scaled.abs()
}

/// Self-contained layout input: dense node array plus symmetric adjacency.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    /// One entry per host node, `nodes[i].index == i`.
    pub nodes: Vec<LayoutNode>,
    /// Raw edge weights keyed by neighbour index. Empty for isolated nodes.
    pub neighbors: Vec<NeighborMap>,
    /// Largest raw weight over non-loop edges, `-inf` when there are none.
    pub highest_similarity: f32,
    /// Host identity of each dense index.
    pub node_ids: Vec<NodeId>,
}

impl GraphSnapshot {
    /// Read `graph` under its read lock.
    ///
    /// Self-loops and edges with non-finite weights are dropped. With
    /// `reset_position` every node that is not fixed starts at the origin.
    pub fn load(graph: &GraphModel, reset_position: bool) -> Result<Self> {
        let data = graph.read();
        let node_count = data.node_count();
        if node_count == 0 {
            return Err(LayoutError::EmptyGraph);
        }

        let mut id_map: FxHashMap<NodeId, u32> = FxHashMap::default();
        id_map.reserve(node_count);
        let mut nodes = Vec::with_capacity(node_count);
        let mut node_ids = Vec::with_capacity(node_count);
        for (i, host) in data.nodes().iter().enumerate() {
            let index = i as u32;
            let (x, y) = if reset_position && !host.fixed {
                (0.0, 0.0)
            } else {
                (host.x, host.y)
            };
            nodes.push(LayoutNode {
                index,
                x,
                y,
                fixed: host.fixed,
            });
            node_ids.push(host.id);
            id_map.insert(host.id, index);
        }

        let mut neighbors = vec![NeighborMap::default(); node_count];
        let mut highest_similarity = f32::NEG_INFINITY;
        let mut self_loops = 0usize;
        for edge in data.edges() {
            let (Some(&source), Some(&target)) =
                (id_map.get(&edge.source), id_map.get(&edge.target))
            else {
                warn!(edge = edge.id.0, "openord_edge_unknown_endpoint");
                continue;
            };
            if source == target {
                self_loops += 1;
                continue;
            }
            if !edge.weight.is_finite() {
                warn!(edge = edge.id.0, weight = edge.weight, "openord_edge_weight_not_finite");
                continue;
            }
            neighbors[source as usize].insert(target, edge.weight);
            neighbors[target as usize].insert(source, edge.weight);
            highest_similarity = highest_similarity.max(edge.weight);
        }
        drop(data);

        info!(
            nodes = node_count,
            self_loops,
            highest_similarity,
            "openord_snapshot_loaded"
        );

        Ok(Self {
            nodes,
            neighbors,
            highest_similarity,
            node_ids,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Divisor used by [`normalize_weight`]; guards against an all-zero graph.
    pub fn weight_scale(&self) -> f32 {
        let h = self.highest_similarity;
        if !h.is_finite() || h == 0.0 {
            1.0
        } else {
            h.abs()
        }
    }

    /// Normalized neighbour map of `index`.
    pub fn normalized_neighbors(&self, index: usize) -> NeighborMap {
        let scale = self.weight_scale();
        self.neighbors[index]
            .iter()
            .map(|(&j, &w)| (j, normalize_weight(w, scale)))
            .collect()
    }

    /// Record each node's dense index on the host graph.
    ///
    /// Takes the write lock briefly, after the read lock from [`load`](Self::load)
    /// has been released.
    pub fn attach_layout_handles(&self, graph: &GraphModel) {
        let mut data = graph.write();
        for (index, id) in self.node_ids.iter().enumerate() {
            if let Some(node) = data.node_mut(*id) {
                node.layout_data = Some(LayoutData {
                    index: index as u32,
                });
            }
        }
    }
}
