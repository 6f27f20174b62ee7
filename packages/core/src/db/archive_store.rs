//! ArchiveStore Trait - Archive Bookkeeping Contract
//!
//! Historical association records and closure membership for archived nodes.
//! Rows are tagged with the archive transaction id that captured them; the
//! tag is what lets a whole closure restore or purge together.

use crate::models::{ArchivedAssociation, ArchivedNode};
use crate::txn::TxnId;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Archive bookkeeping contract.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Find an archived node by external identity.
    async fn get_node(&self, tenant: &str, uuid: Uuid) -> Result<Option<ArchivedNode>>;

    /// Find an archived node by internal id.
    async fn get_node_by_id(&self, internal_id: i64) -> Result<Option<ArchivedNode>>;

    /// Record one captured association under the given archive transaction.
    async fn record(&self, archive_txn: TxnId, assoc: ArchivedAssociation) -> Result<()>;

    /// Recorded parent associations of a node, in capture order.
    async fn find_parent_associations(
        &self,
        child_internal_id: i64,
        hard_only: bool,
    ) -> Result<Vec<ArchivedAssociation>>;

    /// Internal ids of every node archived under the given transaction.
    async fn closure_members(&self, archive_txn: TxnId) -> Result<Vec<i64>>;

    /// Soft outgoing associations captured with the closure, both those of
    /// the root and those embedded via descendants.
    async fn outgoing_soft_associations(
        &self,
        archive_txn: TxnId,
    ) -> Result<Vec<ArchivedAssociation>>;

    /// Re-tag every row of a closure with a new transaction id (restore
    /// brings the closure back as one unit). Returns the member internal ids.
    async fn restore_transaction(&self, archive_txn: TxnId, new_txn: TxnId) -> Result<Vec<i64>>;

    /// Delete the closure's bookkeeping rows. Returns rows deleted.
    async fn delete_closure(&self, archive_txn: TxnId) -> Result<u64>;

    /// Delete the recorded associations of a single node (non-root purge).
    async fn delete_for_node(&self, internal_id: i64) -> Result<u64>;
}
