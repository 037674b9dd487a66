//! Analysis output documents handed to the presentation layer

use crate::model::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Node colors used to tell packages apart when several are analyzed.
pub const PACKAGE_PALETTE: [Color; 5] = [
    Color::LightBlue,
    Color::LightGreen,
    Color::LightGray,
    Color::LightCoral,
    Color::Brown,
];

/// Palette color for the package at `index` in declaration order.
pub fn package_color(index: usize) -> Color {
    PACKAGE_PALETTE[index % PACKAGE_PALETTE.len()]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("edge {edge:?} references unknown node {node:?}")]
    UnknownNode { edge: EdgeId, node: NodeId },
    #[error("self edge on node {0:?}")]
    SelfEdge(NodeId),
}

/// A module or unit that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub item: String,
    pub reason: String,
}

impl FailedItem {
    pub fn new(item: impl Into<String>, reason: impl Into<String>) -> Self {
        FailedItem {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Node and edge sets with the shared invariants: each node once, edges only
/// between known nodes, no self-edges, no duplicate (source, target, kind).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeGraph {
    nodes: Vec<TypeEntity>,
    edges: Vec<GraphEdge>,
    #[serde(skip)]
    node_index: HashMap<NodeId, usize>,
    #[serde(skip)]
    edge_index: HashSet<EdgeId>,
}

impl TypeGraph {
    /// Add a node. Returns false if it was already present.
    pub fn add_node(&mut self, node: TypeEntity) -> bool {
        if self.node_index.contains_key(&node.id) {
            return false;
        }
        self.node_index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Add an edge. Returns Ok(false) for a duplicate.
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool, DocumentError> {
        if edge.is_self_edge() {
            return Err(DocumentError::SelfEdge(edge.source));
        }
        for node in [edge.source, edge.target] {
            if !self.node_index.contains_key(&node) {
                return Err(DocumentError::UnknownNode {
                    edge: edge.id,
                    node,
                });
            }
        }
        if !self.edge_index.insert(edge.id) {
            return Ok(false);
        }
        self.edges.push(edge);
        Ok(true)
    }

    pub fn nodes(&self) -> &[TypeEntity] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&TypeEntity> {
        self.node_index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node_index.contains_key(&id)
    }

    pub fn find_by_full_name(&self, full_name: &str) -> Option<&TypeEntity> {
        self.node(NodeId::from_full_name(full_name))
    }

    /// Kinds of all edges from `source` to `target`.
    pub fn kinds_between(
        &self,
        source: NodeId,
        target: NodeId,
    ) -> impl Iterator<Item = EdgeKind> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.source == source && e.target == target)
            .map(|e| e.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Output of a package dependency analysis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisDocument {
    #[serde(flatten)]
    graph: TypeGraph,
    clusters: BTreeMap<NodeId, String>,
    node_colors: BTreeMap<NodeId, Color>,
    edge_colors: BTreeMap<EdgeId, Color>,
    failed_items: Vec<FailedItem>,
}

impl AnalysisDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: TypeEntity) -> bool {
        self.graph.add_node(node)
    }

    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool, DocumentError> {
        self.graph.add_edge(edge)
    }

    /// Put a node into a cluster. The first assignment wins.
    pub fn add_to_cluster(&mut self, node: NodeId, cluster: impl Into<String>) -> bool {
        if !self.graph.contains_node(node) || self.clusters.contains_key(&node) {
            return false;
        }
        self.clusters.insert(node, cluster.into());
        true
    }

    pub fn set_node_color(&mut self, node: NodeId, color: Color) {
        self.node_colors.insert(node, color);
    }

    pub fn set_edge_color(&mut self, edge: EdgeId, color: Color) {
        self.edge_colors.insert(edge, color);
    }

    pub fn add_failed_item(&mut self, item: FailedItem) {
        self.failed_items.push(item);
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    pub fn nodes(&self) -> &[TypeEntity] {
        self.graph.nodes()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        self.graph.edges()
    }

    pub fn cluster_of(&self, node: NodeId) -> Option<&str> {
        self.clusters.get(&node).map(String::as_str)
    }

    /// Members of a cluster in node id order.
    pub fn cluster_members(&self, cluster: &str) -> Vec<NodeId> {
        self.clusters
            .iter()
            .filter(|(_, name)| name.as_str() == cluster)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn node_color(&self, node: NodeId) -> Option<Color> {
        self.node_colors.get(&node).copied()
    }

    pub fn edge_color(&self, edge: EdgeId) -> Option<Color> {
        self.edge_colors.get(&edge).copied()
    }

    pub fn failed_items(&self) -> &[FailedItem] {
        &self.failed_items
    }

    /// Single kind to display for a pair, by precedence.
    pub fn display_kind(&self, source: NodeId, target: NodeId) -> Option<EdgeKind> {
        self.graph
            .kinds_between(source, target)
            .max_by_key(|kind| kind.precedence())
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

/// Output of an inheritance focus analysis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeRelationshipDocument {
    #[serde(flatten)]
    graph: TypeGraph,
    failed_items: Vec<FailedItem>,
}

impl TypeRelationshipDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: TypeEntity) -> bool {
        self.graph.add_node(node)
    }

    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool, DocumentError> {
        self.graph.add_edge(edge)
    }

    pub fn add_failed_item(&mut self, item: FailedItem) {
        self.failed_items.push(item);
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    /// Caption/tooltip descriptors for every node.
    pub fn descriptors(&self) -> &[TypeEntity] {
        self.graph.nodes()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        self.graph.edges()
    }

    pub fn failed_items(&self) -> &[FailedItem] {
        &self.failed_items
    }

    /// Inheritance graphs draw base-class links black and interfaces blue.
    pub fn edge_color(edge: &GraphEdge) -> Color {
        if edge.kind == EdgeKind::DerivesFrom {
            Color::Black
        } else {
            Color::Blue
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}
