//! NodeStore Trait - Node Persistence Contract
//!
//! This module defines the `NodeStore` trait the engine consumes for node
//! persistence. The backing implementation is external to the core; the crate
//! ships [`crate::db::MemoryStore`] as the embedded reference backend.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async so embedded and network backends
//!    share one contract
//! 2. **Ownership Semantics**: write methods take ownership of the record;
//!    the caller clones if it needs to retain the original
//! 3. **Error Handling**: `anyhow::Result` for flexible error context;
//!    missing rows are `Ok(None)`, never errors
//! 4. **Fetch Options**: finds take an options set selecting which relations
//!    to materialize, so callers never pay for edges they don't read

use crate::models::{ActiveNode, NodeRecord};
use crate::txn::{IndexHint, TxnId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Which relations a node find materializes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub security_group: bool,
    pub parent_assocs: bool,
    pub child_assocs: bool,
    pub paths: bool,
    /// With `parent_assocs`, restrict to the primary hard association.
    pub primary_hard_only: bool,
}

impl FetchOptions {
    /// Core fields only.
    pub const DEFAULT: FetchOptions = FetchOptions {
        security_group: false,
        parent_assocs: false,
        child_assocs: false,
        paths: false,
        primary_hard_only: false,
    };

    /// Core fields plus the security group.
    pub const SECURITY: FetchOptions = FetchOptions {
        security_group: true,
        parent_assocs: false,
        child_assocs: false,
        paths: false,
        primary_hard_only: false,
    };

    /// Core fields plus parent associations and paths.
    pub const PARENTS: FetchOptions = FetchOptions {
        security_group: false,
        parent_assocs: true,
        child_assocs: false,
        paths: true,
        primary_hard_only: false,
    };

    /// Parent associations restricted to the primary hard edge.
    pub const PRIMARY_PARENT: FetchOptions = FetchOptions {
        security_group: false,
        parent_assocs: true,
        child_assocs: false,
        paths: true,
        primary_hard_only: true,
    };

    /// Everything materialized.
    pub const FULL: FetchOptions = FetchOptions {
        security_group: true,
        parent_assocs: true,
        child_assocs: true,
        paths: true,
        primary_hard_only: false,
    };
}

/// Node persistence contract.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Find a node in any lifecycle state by external identity.
    async fn find_by_uuid(
        &self,
        tenant: &str,
        uuid: Uuid,
        opts: FetchOptions,
    ) -> Result<Option<NodeRecord>>;

    /// Find a node in any lifecycle state by internal id.
    async fn find_by_internal_id(&self, id: i64, opts: FetchOptions) -> Result<Option<NodeRecord>>;

    /// Bulk lookup; absent uuids are simply missing from the map.
    async fn map_by_uuids(&self, tenant: &str, uuids: &[Uuid])
        -> Result<HashMap<Uuid, NodeRecord>>;

    /// Persist a new active node, assigning its internal id.
    async fn create(&self, node: ActiveNode) -> Result<ActiveNode>;

    /// Write back core fields and security-group handle of an active node.
    /// Materialized relation lists on the value are ignored.
    async fn update(&self, node: ActiveNode) -> Result<ActiveNode>;

    /// Replace the stored record for the node's internal id with a different
    /// lifecycle variant (archive, restore, purge transitions).
    async fn swap_lifecycle(&self, record: NodeRecord) -> Result<()>;

    /// Stamp a node with the transaction that touched it and the indexing
    /// flag the post-commit indexer consumes.
    async fn set_transaction(&self, internal_id: i64, txn: TxnId, hint: IndexHint) -> Result<()>;

    /// The tenant's root folder, if the tenant is provisioned.
    async fn find_root(&self, tenant: &str) -> Result<Option<ActiveNode>>;

    /// Create the tenant's root folder. Implementations must take an
    /// exclusive advisory lock on the tenant registry so concurrent root
    /// creation cannot race; a second root for the same tenant is an error.
    async fn create_root(&self, node: ActiveNode) -> Result<ActiveNode>;
}
