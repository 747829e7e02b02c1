//! Host graph model shared by the OpenOrd workspace.
//!
//! The layout engine never owns the graph. It reads a [`GraphModel`] once
//! under a read lock to build its own index-based snapshot, and writes the
//! final coordinates back under a write lock when the run ends.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while mutating a [`GraphData`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An edge referenced a node that is not part of the graph.
    #[error("unknown node: {id:?}")]
    UnknownNode { id: NodeId },

    /// A node with the same identifier already exists.
    #[error("duplicate node: {id:?}")]
    DuplicateNode { id: NodeId },
}

/// Identifier for nodes within a [`GraphModel`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier for edges within a [`GraphModel`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

/// Opaque handle a layout attaches to each node it loads.
///
/// It records which dense layout index the node received, so collaborators
/// (renderers, inspectors) can map layout output back to host nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutData {
    pub index: u32,
}

/// A node with a mutable 2D position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub x: f32,
    pub y: f32,
    /// Fixed nodes are never moved by a layout.
    #[serde(default)]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_data: Option<LayoutData>,
}

impl GraphNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            x: 0.0,
            y: 0.0,
            fixed: false,
            layout_data: None,
        }
    }

    pub fn at(id: NodeId, x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Self::new(id)
        }
    }
}

/// A weighted, undirected-for-layout edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Plain graph storage guarded by [`GraphModel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
    #[serde(skip)]
    next_edge_id: u64,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build graph storage from node and edge lists, validating endpoints.
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self> {
        let mut data = Self::new();
        for node in nodes {
            data.insert_node(node)?;
        }
        for edge in edges {
            data.check_endpoints(edge.source, edge.target)?;
            data.next_edge_id = data.next_edge_id.max(edge.id.0 + 1);
            data.edges.push(edge);
        }
        Ok(data)
    }

    /// Add a node at the origin.
    pub fn add_node(&mut self, id: NodeId) -> Result<&mut GraphNode> {
        self.insert_node(GraphNode::new(id))
    }

    /// Add a fully specified node.
    pub fn insert_node(&mut self, node: GraphNode) -> Result<&mut GraphNode> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id });
        }
        let slot = self.nodes.len();
        self.index.insert(node.id, slot);
        self.nodes.push(node);
        Ok(&mut self.nodes[slot])
    }

    /// Add an edge between two existing nodes.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, weight: f32) -> Result<EdgeId> {
        self.check_endpoints(source, target)?;
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.push(GraphEdge {
            id,
            source,
            target,
            weight,
        });
        Ok(id)
    }

    fn check_endpoints(&self, source: NodeId, target: NodeId) -> Result<()> {
        for id in [source, target] {
            if !self.index.contains_key(&id) {
                return Err(GraphError::UnknownNode { id });
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.index.get(&id).map(|&slot| &self.nodes[slot])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        match self.index.get(&id) {
            Some(&slot) => Some(&mut self.nodes[slot]),
            None => None,
        }
    }

    /// Rebuild the id lookup, e.g. after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(slot, node)| (node.id, slot))
            .collect();
        self.next_edge_id = self.edges.iter().map(|e| e.id.0 + 1).max().unwrap_or(0);
    }
}

/// Shared, lock-protected graph handed to layouts.
#[derive(Debug, Default)]
pub struct GraphModel {
    data: RwLock<GraphData>,
}

impl GraphModel {
    pub fn new(data: GraphData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Take the read lock. Structural mutation is blocked while held.
    pub fn read(&self) -> RwLockReadGuard<'_, GraphData> {
        self.data.read()
    }

    /// Take the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, GraphData> {
        self.data.write()
    }

    pub fn into_inner(self) -> GraphData {
        self.data.into_inner()
    }
}

impl From<GraphData> for GraphModel {
    fn from(data: GraphData) -> Self {
        Self::new(data)
    }
}
