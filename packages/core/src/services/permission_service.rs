//! Permission Evaluation and Inheritance Propagation
//!
//! Every mutating operation in the engine calls [`PermissionEvaluator::require`]
//! before acting. Evaluation is pure over the security-group chain: the
//! platform administrator and the node's recorded creator get full access;
//! everyone else gets the bitwise union of every rule on every group
//! reachable along the node's sg chain. Absence of a matching rule denies -
//! there is no default-allow anywhere.
//!
//! The sg chain is the denormalized encoding of inheritance: it lists the
//! ancestor-or-self node ids whose groups govern the node, already truncated
//! at the nearest non-inheriting boundary. Toggling inheritance or moving a
//! node therefore reduces to a prefix rewrite over every affected path row,
//! executed as one transaction-scoped batch so partially-updated ACL state is
//! never visible.

use crate::db::{AclStore, AssociationStore, FetchOptions, NodeStore, PathStore};
use crate::models::{
    AccessRule, ActiveNode, AncestorChain, ArchivedNode, NodeInfo, Permission, PermissionMask,
    SecurityGroup,
};
use crate::services::error::{ServiceError, ServiceResult};
use crate::txn::OpContext;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Bitmask ACL evaluator and sg-path propagator.
pub struct PermissionEvaluator {
    nodes: Arc<dyn NodeStore>,
    assocs: Arc<dyn AssociationStore>,
    acl: Arc<dyn AclStore>,
    paths: Arc<dyn PathStore>,
}

impl PermissionEvaluator {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        assocs: Arc<dyn AssociationStore>,
        acl: Arc<dyn AclStore>,
        paths: Arc<dyn PathStore>,
    ) -> Self {
        Self {
            nodes,
            assocs,
            acl,
            paths,
        }
    }

    /// The actor's effective permission set on an active node.
    pub async fn effective_mask(
        &self,
        ctx: &OpContext,
        node: &ActiveNode,
    ) -> ServiceResult<PermissionMask> {
        if ctx.actor.admin || node.core.creator == ctx.actor.name {
            return Ok(PermissionMask::all());
        }

        let paths = self.assocs.paths_of(node.internal_id()).await?;
        let chain = paths
            .iter()
            .find(|p| p.primary)
            .map(|p| p.sg_chain.clone())
            .unwrap_or_else(|| AncestorChain::from_ids(vec![node.internal_id()]));

        let mut mask = PermissionMask::empty();
        for &id in chain.ids() {
            if let Some(group) = self.acl.group_of_node(id).await? {
                mask |= group.mask_for(ctx.actor.authority_names());
            }
        }
        Ok(mask)
    }

    /// Error with `Forbidden` unless the actor holds `required` on the node.
    pub async fn require(
        &self,
        ctx: &OpContext,
        node: &ActiveNode,
        required: Permission,
    ) -> ServiceResult<()> {
        let mask = self.effective_mask(ctx, node).await?;
        if mask.contains(required) {
            return Ok(());
        }
        debug!(
            node = %node.node_ref(),
            actor = %ctx.actor.name,
            required = %required,
            held = %mask,
            "permission denied"
        );
        Err(ServiceError::forbidden(
            node.node_ref().to_string(),
            required.to_string(),
        ))
    }

    /// Effective permissions on an archived node: the live sg chain is gone,
    /// so only the admin/owner shortcuts and the node's own group apply.
    pub async fn effective_mask_archived(
        &self,
        ctx: &OpContext,
        node: &ArchivedNode,
    ) -> ServiceResult<PermissionMask> {
        if ctx.actor.admin || node.core.creator == ctx.actor.name {
            return Ok(PermissionMask::all());
        }
        let mut mask = PermissionMask::empty();
        if let Some(group) = self.acl.group_of_node(node.internal_id()).await? {
            mask |= group.mask_for(ctx.actor.authority_names());
        }
        Ok(mask)
    }

    /// `require` for the archived side.
    pub async fn require_archived(
        &self,
        ctx: &OpContext,
        node: &ArchivedNode,
        required: Permission,
    ) -> ServiceResult<()> {
        let mask = self.effective_mask_archived(ctx, node).await?;
        if mask.contains(required) {
            return Ok(());
        }
        Err(ServiceError::forbidden(
            node.node_ref().to_string(),
            required.to_string(),
        ))
    }

    /// The rules visible on a node, optionally folding in inherited ones and
    /// restricting to rules that grant Read.
    pub async fn list_permissions(
        &self,
        ctx: &OpContext,
        node_uuid: Uuid,
        include_inherited: bool,
        readable_only: bool,
    ) -> ServiceResult<Vec<AccessRule>> {
        let node = self.require_active(ctx, node_uuid).await?;
        let ids: Vec<i64> = if include_inherited {
            let paths = self.assocs.paths_of(node.internal_id()).await?;
            paths
                .iter()
                .find(|p| p.primary)
                .map(|p| p.sg_chain.ids().to_vec())
                .unwrap_or_else(|| vec![node.internal_id()])
        } else {
            vec![node.internal_id()]
        };

        let mut rules = Vec::new();
        for id in ids {
            if let Some(group) = self.acl.group_of_node(id).await? {
                rules.extend(group.rules);
            }
        }
        if readable_only {
            rules.retain(|r| r.mask.contains(Permission::Read));
        }
        Ok(rules)
    }

    /// Add or replace an access rule on the node's managed group. Requires
    /// Administer; creates the managed group on first use.
    pub async fn add_rule(
        &self,
        ctx: &OpContext,
        node_uuid: Uuid,
        rule: AccessRule,
    ) -> ServiceResult<()> {
        let node = self.require_active(ctx, node_uuid).await?;
        self.require(ctx, &node, Permission::Administer).await?;
        let group = self.ensure_managed_group(&node).await?;
        self.acl.add_rule(group.id, rule).await?;
        self.nodes
            .set_transaction(node.internal_id(), ctx.txn.id, crate::txn::IndexHint::Updated)
            .await?;
        ctx.txn.counter.bump()?;
        Ok(())
    }

    /// Remove an authority's rule from the node's managed group.
    pub async fn remove_rule(
        &self,
        ctx: &OpContext,
        node_uuid: Uuid,
        authority: &str,
    ) -> ServiceResult<()> {
        let node = self.require_active(ctx, node_uuid).await?;
        self.require(ctx, &node, Permission::Administer).await?;
        let group = self.ensure_managed_group(&node).await?;
        self.acl.remove_rule(group.id, authority).await?;
        self.nodes
            .set_transaction(node.internal_id(), ctx.txn.id, crate::txn::IndexHint::Updated)
            .await?;
        ctx.txn.counter.bump()?;
        Ok(())
    }

    /// Toggle inheritance on the node's managed group, rewriting the sg-path
    /// prefix of the whole subtree in one batch. Returns path rows rewritten.
    ///
    /// Re-applying the current flag is a no-op, so toggling on/off/on leaves
    /// every descendant's suffix untouched.
    pub async fn set_inheritance(
        &self,
        ctx: &OpContext,
        node_uuid: Uuid,
        inherits: bool,
    ) -> ServiceResult<u64> {
        let node = self.require_active(ctx, node_uuid).await?;
        self.require(ctx, &node, Permission::Administer).await?;

        let group = self.ensure_managed_group(&node).await?;
        if group.inherits == inherits {
            return Ok(0);
        }

        let paths = self.assocs.paths_of(node.internal_id()).await?;
        let old_chain = paths
            .iter()
            .find(|p| p.primary)
            .map(|p| p.sg_chain.clone())
            .ok_or_else(|| {
                ServiceError::not_found(format!("primary path of node {}", node.node_ref()))
            })?;

        let new_chain = if inherits {
            match node.primary_parent() {
                Some(parent_assoc) => {
                    let parent_paths = self.assocs.paths_of(parent_assoc.parent_id).await?;
                    let parent_primary =
                        parent_paths.iter().find(|p| p.primary).ok_or_else(|| {
                            ServiceError::not_found(format!(
                                "primary path of parent node {}",
                                parent_assoc.parent_id
                            ))
                        })?;
                    parent_primary.sg_chain.child(node.internal_id())
                }
                None => AncestorChain::from_ids(vec![node.internal_id()]),
            }
        } else {
            AncestorChain::from_ids(vec![node.internal_id()])
        };

        self.acl.set_inheritance(group.id, inherits).await?;
        let rewritten = self
            .acl
            .replace_sg_paths(ctx.txn.id, &old_chain, &new_chain)
            .await?;
        ctx.txn.counter.bump_by(rewritten)?;
        self.paths.propagate_paths_transaction(ctx.txn.id).await?;

        info!(
            node = %node.node_ref(),
            inherits,
            rewritten,
            "security-group inheritance changed"
        );
        Ok(rewritten)
    }

    /// Reparenting pass: rewrite ancestor and sg prefixes of the moved
    /// subtree as one batch, then run the propagation stamp. Returns path
    /// rows rewritten.
    pub(crate) async fn propagate_reparent(
        &self,
        ctx: &OpContext,
        old_ancestors: &AncestorChain,
        new_ancestors: &AncestorChain,
        old_sg: &AncestorChain,
        new_sg: &AncestorChain,
    ) -> ServiceResult<u64> {
        let mut rewritten = self
            .assocs
            .replace_ancestor_prefixes(ctx.txn.id, old_ancestors, new_ancestors)
            .await?;
        if old_sg != new_sg {
            rewritten += self.acl.replace_sg_paths(ctx.txn.id, old_sg, new_sg).await?;
        }
        ctx.txn.counter.bump_by(rewritten)?;
        self.paths.propagate_paths_transaction(ctx.txn.id).await?;
        Ok(rewritten)
    }

    /// Whether the node's own group still inherits from ancestors. Nodes
    /// without a managed group inherit by default.
    pub(crate) async fn node_inherits(&self, internal_id: i64) -> ServiceResult<bool> {
        Ok(self
            .acl
            .group_of_node(internal_id)
            .await?
            .map(|g| g.inherits)
            .unwrap_or(true))
    }

    /// The node's managed group, created on first use.
    pub(crate) async fn ensure_managed_group(
        &self,
        node: &ActiveNode,
    ) -> ServiceResult<SecurityGroup> {
        if let Some(group) = self.acl.group_of_node(node.internal_id()).await? {
            return Ok(group);
        }
        let group = SecurityGroup::managed(node.core.node_ref.tenant.clone(), node.internal_id());
        Ok(self.acl.create_group(group).await?)
    }

    async fn require_active(&self, ctx: &OpContext, uuid: Uuid) -> ServiceResult<ActiveNode> {
        let record = self
            .nodes
            .find_by_uuid(&ctx.tenant, uuid, FetchOptions::PRIMARY_PARENT)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("node {}/{}", ctx.tenant, uuid)))?;
        record.into_active().ok_or_else(|| {
            ServiceError::precondition(format!("node {}/{} is not active", ctx.tenant, uuid))
        })
    }
}

#[cfg(test)]
#[path = "permission_service_test.rs"]
mod permission_service_test;
