//! Core data structures for the type graph

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// First eight bytes of the SHA-256 digest, little endian.
fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Unique, stable identifier for a type node.
///
/// Derived from the fully-qualified type name, so the same type seen from two
/// modules or two packages always maps to the same node. The hash does not
/// depend on the toolchain or platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn from_full_name(full_name: &str) -> Self {
        NodeId(stable_hash(&[full_name.as_bytes()]))
    }
}

/// Unique edge identifier (hash of source + target + kind).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EdgeId(pub u64);

impl EdgeId {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        EdgeId(stable_hash(&[
            &source.0.to_le_bytes(),
            &target.0.to_le_bytes(),
            kind.as_str().as_bytes(),
        ]))
    }
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    // ── Structural ──────────────────────────────────────────
    DerivesFrom,
    Implements,

    // ── Behavioral / usage ──────────────────────────────────
    Calls,
    References,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::DerivesFrom,
        EdgeKind::Implements,
        EdgeKind::Calls,
        EdgeKind::References,
    ];

    /// Display precedence when several kinds connect the same pair.
    /// Higher wins: DerivesFrom > Implements > Calls > References.
    pub fn precedence(self) -> u8 {
        match self {
            EdgeKind::DerivesFrom => 3,
            EdgeKind::Implements => 2,
            EdgeKind::Calls => 1,
            EdgeKind::References => 0,
        }
    }

    /// Inheritance relationships (derives-from / implements).
    pub fn is_structural(self) -> bool {
        matches!(self, EdgeKind::DerivesFrom | EdgeKind::Implements)
    }

    /// Edge color used in package dependency graphs.
    /// `None` means default rendering.
    pub fn color(self) -> Option<Color> {
        match self {
            EdgeKind::DerivesFrom | EdgeKind::Implements => Some(Color::Blue),
            EdgeKind::Calls => None,
            EdgeKind::References => Some(Color::Gray),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::DerivesFrom => "derives-from",
            EdgeKind::Implements => "implements",
            EdgeKind::Calls => "calls",
            EdgeKind::References => "references",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named colors handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    LightBlue,
    LightGreen,
    LightGray,
    LightCoral,
    Brown,
    Blue,
    Gray,
    Black,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::LightBlue => "LightBlue",
            Color::LightGreen => "LightGreen",
            Color::LightGray => "LightGray",
            Color::LightCoral => "LightCoral",
            Color::Brown => "Brown",
            Color::Blue => "Blue",
            Color::Gray => "Gray",
            Color::Black => "Black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type as it appears in a graph: the node candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeEntity {
    pub id: NodeId,
    /// Short display name (caption).
    pub name: String,
    /// Fully-qualified name (tooltip, cluster matching).
    pub full_name: String,
    /// Name of the owning module. `None` for types only known by reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl TypeEntity {
    pub fn new(full_name: impl Into<String>, name: impl Into<String>, module: Option<String>) -> Self {
        let full_name = full_name.into();
        TypeEntity {
            id: NodeId::from_full_name(&full_name),
            name: name.into(),
            full_name,
            module,
        }
    }

    /// Build an entity for a type only known by its full name.
    pub fn from_reference(full_name: &str) -> Self {
        TypeEntity::new(full_name, short_name(full_name), None)
    }
}

/// Last segment of a full name: `Core.Outer+Inner` -> `Inner`.
pub fn short_name(full_name: &str) -> &str {
    let generic_start = full_name.find('<').unwrap_or(full_name.len());
    let head = &full_name[..generic_start];
    let start = head.rfind(['.', '+']).map_or(0, |i| i + 1);
    &full_name[start..]
}

/// A directed edge in a type graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

impl GraphEdge {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        GraphEdge {
            id: EdgeId::new(source, target, kind),
            source,
            target,
            kind,
        }
    }

    pub fn is_self_edge(&self) -> bool {
        self.source == self.target
    }
}
