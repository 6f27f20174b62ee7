//! PathStore Trait - Path Resolution and Propagation Contract
//!
//! Name-based path resolution (longest existing prefix) and the re-stamp pass
//! that finishes a batch prefix rewrite.

use anyhow::Result;
use async_trait::async_trait;

use crate::txn::TxnId;

/// Path resolution and propagation contract.
#[async_trait]
pub trait PathStore: Send + Sync {
    /// Resolve the longest existing prefix of a slash path, walking hard
    /// containment edges by name from the tenant root. Returns the deepest
    /// matched node's internal id and how many segments matched; `None` when
    /// the tenant has no root.
    async fn find_longest_path_node(
        &self,
        tenant: &str,
        segments: &[String],
    ) -> Result<Option<(i64, usize)>>;

    /// Stamp every node whose path rows were rewritten under `txn` with that
    /// transaction (the propagation pass after a prefix rewrite). Returns the
    /// number of nodes stamped.
    async fn propagate_paths_transaction(&self, txn: TxnId) -> Result<u64>;
}
