//! Path Derivation
//!
//! Shared subtree path maintenance. Link mutations and archive restore both
//! end with the same pass: re-derive every affected node's path rows from its
//! hard parents, stamp the node with the current transaction, and count it
//! against the mutation cap.

use crate::db::{AclStore, AssocFilter, AssociationStore, FetchOptions, NodeStore, Page};
use crate::models::{ActiveNode, AncestorChain, NodeInfo, NodePath};
use crate::services::error::{ServiceError, ServiceResult};
use crate::txn::{IndexHint, OpContext};
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) struct PathRebuilder {
    nodes: Arc<dyn NodeStore>,
    assocs: Arc<dyn AssociationStore>,
    acl: Arc<dyn AclStore>,
}

impl PathRebuilder {
    pub(crate) fn new(
        nodes: Arc<dyn NodeStore>,
        assocs: Arc<dyn AssociationStore>,
        acl: Arc<dyn AclStore>,
    ) -> Self {
        Self { nodes, assocs, acl }
    }

    /// Whether the node's own security group keeps inheriting from ancestors.
    /// Nodes without a managed group inherit by default.
    async fn inherits(&self, internal_id: i64) -> ServiceResult<bool> {
        Ok(self
            .acl
            .group_of_node(internal_id)
            .await?
            .map(|g| g.inherits)
            .unwrap_or(true))
    }

    /// Derive the node's path rows from its current hard parents.
    ///
    /// A node with no hard parent is a tenant root: its single primary path
    /// is just its own id. Every hard parent contributes one row built from
    /// that parent's primary path; the row inherits the association's primary
    /// flag.
    pub(crate) async fn derive_paths(&self, node_id: i64) -> ServiceResult<Vec<NodePath>> {
        let inherits = self.inherits(node_id).await?;
        let hard_parents = self
            .assocs
            .find(AssocFilter::parents_of(node_id).hard(), Page::all())
            .await?;

        if hard_parents.is_empty() {
            let own = AncestorChain::from_ids(vec![node_id]);
            return Ok(vec![NodePath::new(own.clone(), own, true)]);
        }

        let mut paths = Vec::with_capacity(hard_parents.len());
        for assoc in &hard_parents {
            let parent_paths = self.assocs.paths_of(assoc.parent_id).await?;
            let parent_primary = parent_paths.iter().find(|p| p.primary).ok_or_else(|| {
                ServiceError::not_found(format!(
                    "primary path of parent node {} is missing",
                    assoc.parent_id
                ))
            })?;
            let ancestors = parent_primary.ancestors.child(node_id);
            let sg_chain = if inherits {
                parent_primary.sg_chain.child(node_id)
            } else {
                AncestorChain::from_ids(vec![node_id])
            };
            paths.push(NodePath::new(ancestors, sg_chain, assoc.primary));
        }
        Ok(paths)
    }

    /// Re-derive path rows for a node and every hard descendant, breadth
    /// first, stamping each with the current transaction.
    pub(crate) async fn rebuild_subtree(&self, ctx: &OpContext, root: i64) -> ServiceResult<u64> {
        let mut queue = VecDeque::from([root]);
        let mut visited = HashSet::new();
        let mut rebuilt = 0u64;

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let record = self
                .nodes
                .find_by_internal_id(node_id, FetchOptions::DEFAULT)
                .await?;
            let Some(record) = record else { continue };
            if record.as_active().is_none() {
                continue;
            }

            let paths = self.derive_paths(node_id).await?;
            self.assocs.replace_paths(node_id, paths).await?;
            self.nodes
                .set_transaction(node_id, ctx.txn.id, IndexHint::Updated)
                .await?;
            ctx.txn.counter.bump()?;
            rebuilt += 1;

            for child in self
                .assocs
                .find(AssocFilter::children_of(node_id).hard(), Page::all())
                .await?
            {
                queue.push_back(child.child_id);
            }
        }
        Ok(rebuilt)
    }

    /// Install the primary path row for a freshly created tenant root.
    pub(crate) async fn install_root_path(&self, root: &ActiveNode) -> ServiceResult<()> {
        let own = AncestorChain::from_ids(vec![root.internal_id()]);
        self.assocs
            .replace_paths(
                root.internal_id(),
                vec![NodePath::new(own.clone(), own, true)],
            )
            .await?;
        Ok(())
    }
}
