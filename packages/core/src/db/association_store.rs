//! AssociationStore Trait - Edge and Path Persistence Contract
//!
//! Associations and the denormalized path rows they imply are persisted
//! together: every mutation that changes an edge also rewrites the path rows
//! of the affected subtree, and the two must land in the same transaction.

use crate::models::{Association, NodePath};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Filter for association queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AssocFilter {
    pub parent_id: Option<i64>,
    pub child_id: Option<i64>,
    pub type_name: Option<String>,
    pub name: Option<String>,
    pub hard_only: bool,
}

impl AssocFilter {
    pub fn parents_of(child_id: i64) -> Self {
        Self {
            child_id: Some(child_id),
            ..Self::default()
        }
    }

    pub fn children_of(parent_id: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn hard(mut self) -> Self {
        self.hard_only = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, assoc: &Association) -> bool {
        if let Some(p) = self.parent_id {
            if assoc.parent_id != p {
                return false;
            }
        }
        if let Some(c) = self.child_id {
            if assoc.child_id != c {
                return false;
            }
        }
        if let Some(t) = &self.type_name {
            if &assoc.type_name != t {
                return false;
            }
        }
        if let Some(n) = &self.name {
            if assoc.name.as_deref() != Some(n.as_str()) {
                return false;
            }
        }
        !self.hard_only || assoc.hard
    }
}

/// Pagination window for association queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }
}

/// Association and path persistence contract.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Query associations in store enumeration order.
    async fn find(&self, filter: AssocFilter, page: Page) -> Result<Vec<Association>>;

    /// Fetch one association by row id.
    async fn get(&self, assoc_id: Uuid) -> Result<Option<Association>>;

    async fn create(&self, assoc: Association) -> Result<Association>;

    /// Update the `name` of one association.
    async fn rename(&self, assoc_id: Uuid, name: &str) -> Result<()>;

    /// Flip the `primary` flag of one association.
    async fn set_primary(&self, assoc_id: Uuid, primary: bool) -> Result<()>;

    async fn delete(&self, assoc_id: Uuid) -> Result<()>;

    /// Drop every association touching the node, both directions. Returns the
    /// number removed.
    async fn delete_for_node(&self, internal_id: i64) -> Result<u64>;

    /// Duplicate all child associations of one parent under another (copy
    /// support).
    async fn copy_children(&self, from_parent: i64, to_parent: i64) -> Result<u64>;

    /// The node's current path rows.
    async fn paths_of(&self, internal_id: i64) -> Result<Vec<NodePath>>;

    /// Replace the node's path rows wholesale.
    async fn replace_paths(&self, internal_id: i64, paths: Vec<NodePath>) -> Result<()>;

    /// Batch prefix rewrite of ancestor chains across all path rows, marking
    /// touched nodes for the given transaction. Returns rows rewritten.
    async fn replace_ancestor_prefixes(
        &self,
        txn: crate::txn::TxnId,
        old_prefix: &crate::models::AncestorChain,
        new_prefix: &crate::models::AncestorChain,
    ) -> Result<u64>;
}
