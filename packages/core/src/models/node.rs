//! Node Data Structures
//!
//! This module defines the node entity in its three lifecycle forms and the
//! shared accessor surface over them.
//!
//! # Architecture
//!
//! - **Tagged lifecycle**: `Active`, `Archived` and `Removed` nodes are one
//!   sum type ([`NodeRecord`]) sharing a common [`NodeCore`]; the archive
//!   state machine dispatches on the tag instead of downcasting.
//! - **Dual identity**: nodes are addressed externally by `(tenant, uuid)`
//!   ([`NodeRef`]) and internally by a store-assigned numeric id that stays
//!   stable across lifecycle transitions and is what path strings encode.
//! - **Explicit empties**: materialized relation lists default to empty
//!   vectors; there are no nullable collections.
//!
//! # Examples
//!
//! ```rust
//! use cairn_core::models::{ActiveNode, NodeInfo, TYPE_FOLDER};
//! use cairn_core::txn::TxnId;
//!
//! let node = ActiveNode::new("acme", TYPE_FOLDER, "alice", TxnId::new());
//! assert_eq!(node.core().type_name, TYPE_FOLDER);
//! assert_eq!(node.core().version, 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::association::Association;
use crate::models::path::NodePath;
use crate::txn::TxnId;

/// Folder node type: the containment-capable structural type.
pub const TYPE_FOLDER: &str = "folder";

/// Document node type.
pub const TYPE_DOCUMENT: &str = "document";

/// Display-name property; defaults association names.
pub const PROP_NAME: &str = "name";

/// RFC 3339 expiry timestamp consulted by delete-if-expired.
pub const PROP_EXPIRES_AT: &str = "expires_at";

/// Marker aspect present on every archived node.
pub const ASPECT_ARCHIVED: &str = "archived";

/// Marker aspect present on the root of an archive closure.
pub const ASPECT_ARCHIVE_ROOT: &str = "archive-root";

/// Validation errors for node data.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Blank name is not a valid association name")]
    BlankName,

    #[error("Invalid property value for '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },
}

/// External node identity: globally unique per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub tenant: String,
    pub id: Uuid,
}

impl NodeRef {
    pub fn new(tenant: impl Into<String>, id: Uuid) -> Self {
        Self {
            tenant: tenant.into(),
            id,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.id)
    }
}

/// Pointer into the external content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentProperty {
    pub name: String,
    pub store_url: String,
    pub size: u64,
    pub mimetype: String,
}

/// Fields shared by all lifecycle variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCore {
    pub node_ref: NodeRef,
    /// Store-assigned numeric id, stable across lifecycle transitions. Zero
    /// until the store has persisted the node.
    pub internal_id: i64,
    pub type_name: String,
    pub aspects: BTreeSet<String>,
    pub properties: Map<String, Value>,
    pub content: Vec<ContentProperty>,
    pub version: i64,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Transaction that last touched this node.
    pub txn_id: TxnId,
}

impl NodeCore {
    /// The display name, when the `"name"` property is a string.
    pub fn name(&self) -> Option<&str> {
        self.properties.get(PROP_NAME).and_then(Value::as_str)
    }

    pub fn has_aspect(&self, aspect: &str) -> bool {
        self.aspects.contains(aspect)
    }

    pub fn add_aspect(&mut self, aspect: impl Into<String>) {
        self.aspects.insert(aspect.into());
    }

    pub fn remove_aspect(&mut self, aspect: &str) {
        self.aspects.remove(aspect);
    }

    /// Parsed expiry timestamp, if the property is present and well-formed.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.properties
            .get(PROP_EXPIRES_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Bump version and audit fields for a mutation in `txn`.
    pub fn touch(&mut self, txn: TxnId) {
        self.version += 1;
        self.modified_at = Utc::now();
        self.txn_id = txn;
    }
}

/// A node in the live graph.
///
/// Relation lists (`parent_assocs`, `child_assocs`, `paths`) are materialized
/// by the store according to the caller's fetch options and are empty
/// otherwise; the store ignores them on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveNode {
    pub core: NodeCore,
    /// Managed security group owned by this node.
    pub security_group: Option<Uuid>,
    #[serde(default)]
    pub parent_assocs: Vec<Association>,
    #[serde(default)]
    pub child_assocs: Vec<Association>,
    #[serde(default)]
    pub paths: Vec<NodePath>,
}

impl ActiveNode {
    pub fn new(
        tenant: impl Into<String>,
        type_name: impl Into<String>,
        creator: impl Into<String>,
        txn: TxnId,
    ) -> Self {
        let now = Utc::now();
        Self {
            core: NodeCore {
                node_ref: NodeRef::new(tenant, Uuid::new_v4()),
                internal_id: 0,
                type_name: type_name.into(),
                aspects: BTreeSet::new(),
                properties: Map::new(),
                content: Vec::new(),
                version: 1,
                creator: creator.into(),
                created_at: now,
                modified_at: now,
                txn_id: txn,
            },
            security_group: None,
            parent_assocs: Vec::new(),
            child_assocs: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.core.properties.insert(name.into(), value);
        self
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.with_property(PROP_NAME, Value::String(name))
    }

    /// All materialized hard parent associations.
    pub fn hard_parents(&self) -> impl Iterator<Item = &Association> {
        self.parent_assocs.iter().filter(|a| a.hard)
    }

    /// The unique primary hard parent association, when materialized.
    pub fn primary_parent(&self) -> Option<&Association> {
        self.parent_assocs.iter().find(|a| a.hard && a.primary)
    }

    /// The unique path that follows only primary hard edges.
    pub fn primary_path(&self) -> Option<&NodePath> {
        self.paths.iter().find(|p| p.primary)
    }

    /// Rebuild into the archived form, dropping live relations.
    pub fn into_archived(mut self, archive_txn: TxnId) -> ArchivedNode {
        self.core.add_aspect(ASPECT_ARCHIVED);
        ArchivedNode {
            core: self.core,
            security_group: self.security_group,
            archive_txn,
        }
    }
}

/// A node moved out of the live graph, tagged with its archive closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedNode {
    pub core: NodeCore,
    /// Carried so ACL evaluation still works on the archived side.
    pub security_group: Option<Uuid>,
    /// Shared by every member of the closure archived together.
    pub archive_txn: TxnId,
}

impl ArchivedNode {
    /// True for the node whose hard-parent severing started the closure.
    pub fn is_closure_root(&self) -> bool {
        self.core.has_aspect(ASPECT_ARCHIVE_ROOT)
    }

    /// Rebuild into the active form with empty relations; the caller re-links
    /// and re-derives paths.
    pub fn into_active(mut self) -> ActiveNode {
        self.core.remove_aspect(ASPECT_ARCHIVED);
        self.core.remove_aspect(ASPECT_ARCHIVE_ROOT);
        ActiveNode {
            core: self.core,
            security_group: self.security_group,
            parent_assocs: Vec::new(),
            child_assocs: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// Rebuild into the removed tombstone.
    pub fn into_removed(self) -> RemovedNode {
        RemovedNode { core: self.core }
    }
}

/// Tombstone left behind by a purge with `remove` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedNode {
    pub core: NodeCore,
}

/// Lifecycle state tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Active,
    Archived,
    Removed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Active => "ACTIVE",
            Lifecycle::Archived => "ARCHIVED",
            Lifecycle::Removed => "REMOVED",
        };
        write!(f, "{}", s)
    }
}

/// A node in any lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRecord {
    Active(ActiveNode),
    Archived(ArchivedNode),
    Removed(RemovedNode),
}

impl NodeRecord {
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            NodeRecord::Active(_) => Lifecycle::Active,
            NodeRecord::Archived(_) => Lifecycle::Archived,
            NodeRecord::Removed(_) => Lifecycle::Removed,
        }
    }

    pub fn as_active(&self) -> Option<&ActiveNode> {
        match self {
            NodeRecord::Active(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_archived(&self) -> Option<&ArchivedNode> {
        match self {
            NodeRecord::Archived(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_active(self) -> Option<ActiveNode> {
        match self {
            NodeRecord::Active(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_archived(self) -> Option<ArchivedNode> {
        match self {
            NodeRecord::Archived(n) => Some(n),
            _ => None,
        }
    }
}

/// Shared accessor surface over all lifecycle variants.
pub trait NodeInfo {
    fn core(&self) -> &NodeCore;

    fn node_ref(&self) -> &NodeRef {
        &self.core().node_ref
    }

    fn internal_id(&self) -> i64 {
        self.core().internal_id
    }

    fn type_name(&self) -> &str {
        &self.core().type_name
    }

    fn version(&self) -> i64 {
        self.core().version
    }
}

impl NodeInfo for ActiveNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl NodeInfo for ArchivedNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl NodeInfo for RemovedNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl NodeInfo for NodeRecord {
    fn core(&self) -> &NodeCore {
        match self {
            NodeRecord::Active(n) => &n.core,
            NodeRecord::Archived(n) => &n.core,
            NodeRecord::Removed(n) => &n.core,
        }
    }
}
