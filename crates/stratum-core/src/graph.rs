//! Graph wrapper using petgraph::StableDiGraph keyed by NodeId

use crate::model::*;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// A directed type graph with at most one edge per (source, target, kind).
pub struct Graph {
    inner: StableDiGraph<TypeEntity, EdgeKind>,
    index: HashMap<NodeId, NodeIndex>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node unless one with the same id exists.
    ///
    /// A node first added from a bare reference is upgraded in place once its
    /// defining module is seen.
    pub fn add_node(&mut self, node: TypeEntity) -> NodeId {
        let id = node.id;
        match self.index.get(&id) {
            Some(&idx) => {
                if let Some(existing) = self.inner.node_weight_mut(idx) {
                    if existing.module.is_none() && node.module.is_some() {
                        tracing::trace!("Resolved {} to its defining module", node.full_name);
                        *existing = node;
                    }
                }
            }
            None => {
                let idx = self.inner.add_node(node);
                self.index.insert(id, idx);
            }
        }
        id
    }

    /// Add an edge between two existing nodes.
    ///
    /// Returns false for self-edges, unknown endpoints and duplicates.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        if source == target || self.has_edge_between(source, target, kind) {
            return false;
        }
        let (Some(&from), Some(&to)) = (self.index.get(&source), self.index.get(&target)) else {
            return false;
        };
        self.inner.add_edge(from, to, kind);
        true
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&TypeEntity> {
        self.index
            .get(&id)
            .and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Iterate over all nodes in insertion order.
    pub fn all_nodes(&self) -> impl Iterator<Item = &TypeEntity> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    /// Iterate over all edges in insertion order.
    pub fn all_edges(&self) -> impl Iterator<Item = GraphEdge> + '_ {
        self.inner.edge_indices().filter_map(move |idx| {
            let (from, to) = self.inner.edge_endpoints(idx)?;
            let kind = *self.inner.edge_weight(idx)?;
            Some(GraphEdge::new(
                self.inner[from].id,
                self.inner[to].id,
                kind,
            ))
        })
    }

    /// Check if an edge exists between two nodes of a specific kind.
    pub fn has_edge_between(&self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(&source), self.index.get(&target)) else {
            return false;
        };
        self.inner
            .edges_directed(from, Direction::Outgoing)
            .any(|e| e.target() == to && *e.weight() == kind)
    }

    /// Find a node by fully qualified name.
    pub fn find_node_by_full_name(&self, full_name: &str) -> Option<NodeId> {
        let id = NodeId::from_full_name(full_name);
        self.contains(id).then_some(id)
    }

    /// All nodes reachable by following outgoing edges (base types, interfaces).
    pub fn ancestors(&self, node: NodeId) -> HashSet<NodeId> {
        self.reachable(node, Direction::Outgoing)
    }

    /// All nodes reaching `node` (derived types, implementors).
    pub fn descendants(&self, node: NodeId) -> HashSet<NodeId> {
        self.reachable(node, Direction::Incoming)
    }

    /// The node itself plus its ancestors and descendants.
    pub fn neighborhood(&self, node: NodeId) -> HashSet<NodeId> {
        if !self.contains(node) {
            return HashSet::new();
        }
        let mut set = self.ancestors(node);
        set.extend(self.descendants(node));
        set.insert(node);
        set
    }

    fn reachable(&self, node: NodeId, direction: Direction) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let Some(&start) = self.index.get(&node) else {
            return visited;
        };
        let mut to_visit = vec![start];

        while let Some(current) = to_visit.pop() {
            for next in self.inner.neighbors_directed(current, direction) {
                let id = self.inner[next].id;
                if id != node && visited.insert(id) {
                    to_visit.push(next);
                }
            }
        }

        visited
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
