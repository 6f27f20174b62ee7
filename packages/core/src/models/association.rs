//! Association Structures
//!
//! Directed, typed, named edges between nodes. Hard associations are
//! structural: they form the containment graph, carry the primary-parent
//! designation, and their removal can trigger archival. Soft associations are
//! references with no lifecycle effect.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structural containment association type.
pub const ASSOC_TYPE_CONTAINS: &str = "contains";

/// Non-hierarchical reference association type.
pub const ASSOC_TYPE_REFERENCES: &str = "references";

/// A live edge between two nodes, addressed by internal ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: Uuid,
    pub parent_id: i64,
    pub child_id: i64,
    pub type_name: String,
    /// Required for hierarchical edges, unique among a parent's hard children.
    pub name: Option<String>,
    /// Structural flag; defaults to soft unless explicitly set.
    #[serde(default)]
    pub hard: bool,
    /// At most one hard parent association per node carries this.
    #[serde(default)]
    pub primary: bool,
}

impl Association {
    pub fn new(
        parent_id: i64,
        child_id: i64,
        type_name: impl Into<String>,
        name: Option<String>,
        hard: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            child_id,
            type_name: type_name.into(),
            name,
            hard,
            primary: false,
        }
    }

    /// Same endpoint, type and name: the duplicate-request test of createLink.
    pub fn same_edge(&self, other: &Association) -> bool {
        self.parent_id == other.parent_id
            && self.child_id == other.child_id
            && self.type_name == other.type_name
            && self.name == other.name
            && self.hard == other.hard
    }
}

/// Historical record of an edge captured at archive time.
///
/// Enables exact association restoration without walking the live graph. The
/// parent side may itself be archived (closure-internal edge) or still
/// active (the severed edge that triggered archival, or a secondary parent
/// outside the closure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedAssociation {
    pub parent_id: i64,
    pub child_id: i64,
    /// True when the parent side is a member of the same archive closure.
    pub parent_archived: bool,
    pub type_name: String,
    pub name: Option<String>,
    pub hard: bool,
    pub primary: bool,
}

impl ArchivedAssociation {
    pub fn capture(assoc: &Association, parent_archived: bool) -> Self {
        Self {
            parent_id: assoc.parent_id,
            child_id: assoc.child_id,
            parent_archived,
            type_name: assoc.type_name.clone(),
            name: assoc.name.clone(),
            hard: assoc.hard,
            primary: assoc.primary,
        }
    }
}

/// Role the subject node plays in a link request.
///
/// `Parent`/`Child` are hierarchical (hard-capable); `Source`/`Target` build
/// non-hierarchical reference edges and are always soft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    Parent,
    Child,
    Source,
    Target,
}

impl Relationship {
    pub fn is_hierarchical(self) -> bool {
        matches!(self, Relationship::Parent | Relationship::Child)
    }
}

/// Delete discipline for link removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove unconditionally.
    Delete,
    /// Remove only if the node's expiry property is due; silent no-op
    /// otherwise.
    DeleteIfExpired,
}

/// Which hard-parent associations a rename targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameMode {
    All,
    /// First found in store enumeration order. With several hard parents the
    /// pick is unspecified.
    First,
}
