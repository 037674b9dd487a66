//! Stratum Core: type graph model, analysis documents and cancellation

pub mod cancel;
pub mod document;
pub mod graph;
pub mod model;


pub use cancel::{CancellationToken, Cancelled, Outcome};
pub use document::{
    AnalysisDocument, DocumentError, FailedItem, PACKAGE_PALETTE, TypeGraph,
    TypeRelationshipDocument, package_color,
};
pub use graph::Graph;
pub use model::{Color, EdgeId, EdgeKind, GraphEdge, NodeId, TypeEntity, short_name};
