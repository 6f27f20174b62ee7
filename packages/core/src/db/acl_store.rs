//! AclStore Trait - Security Group Persistence Contract
//!
//! Security groups, their access rules, and the batch sg-path rewrite that
//! keeps inherited-permission prefixes consistent across a subtree. The
//! rewrite is deliberately a store-side batch: partially-updated ACL state
//! must never be visible outside the transaction.

use crate::models::{AccessRule, AncestorChain, SecurityGroup};
use crate::txn::TxnId;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Security-group persistence contract.
#[async_trait]
pub trait AclStore: Send + Sync {
    async fn group(&self, tenant: &str, id: Uuid) -> Result<Option<SecurityGroup>>;

    /// The managed group owned by a node, if any.
    async fn group_of_node(&self, internal_id: i64) -> Result<Option<SecurityGroup>>;

    async fn create_group(&self, group: SecurityGroup) -> Result<SecurityGroup>;

    /// Add or replace the rule for `rule.authority` on the group.
    async fn add_rule(&self, group_id: Uuid, rule: AccessRule) -> Result<()>;

    async fn remove_rule(&self, group_id: Uuid, authority: &str) -> Result<()>;

    async fn set_inheritance(&self, group_id: Uuid, inherits: bool) -> Result<()>;

    /// Destroy a group (managed groups die with their node).
    async fn delete_group(&self, group_id: Uuid) -> Result<()>;

    /// Batch prefix rewrite of sg chains across all path rows, marking
    /// touched nodes for the given transaction. Returns rows rewritten.
    async fn replace_sg_paths(
        &self,
        txn: TxnId,
        old_prefix: &AncestorChain,
        new_prefix: &AncestorChain,
    ) -> Result<u64>;
}
