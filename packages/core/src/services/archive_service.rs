//! Archive Lifecycle Management
//!
//! The lifecycle state machine over nodes: `ACTIVE -> ARCHIVED` when the last
//! hard parent is severed (driven by the link service), `ARCHIVED -> ACTIVE`
//! on restore, `ARCHIVED -> REMOVED` on purge. There is no direct
//! `ACTIVE -> REMOVED` transition.
//!
//! Archival captures the node's hard-descendant closure in one pass: every
//! descendant whose hard parents all sit inside the closure moves with it,
//! tagged with a shared archive transaction id. The captured
//! `ArchivedAssociation` rows are what make restore exact - associations are
//! replayed from the bookkeeping, never reconstructed by walking the live
//! graph.

use crate::db::{
    AclStore, ArchiveStore, AssocFilter, AssociationStore, FetchOptions, NodeStore, Page,
};
use crate::models::{
    ActiveNode, ArchivedAssociation, Association, NodeInfo, NodeRecord, Permission,
    ASPECT_ARCHIVED, ASPECT_ARCHIVE_ROOT, ASSOC_TYPE_CONTAINS,
};
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::pathing::PathRebuilder;
use crate::services::permission_service::PermissionEvaluator;
use crate::txn::{Actor, IndexHint, OpContext, TxnJoin};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Which recorded hard-parent associations a restore replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// Replay every recorded hard-parent association.
    #[default]
    All,
    /// Recreate only the primary association at the destination.
    PrimaryOnly,
}

/// Orchestrates the active/archived/removed lifecycle.
pub struct ArchiveService {
    nodes: Arc<dyn NodeStore>,
    assocs: Arc<dyn AssociationStore>,
    archive: Arc<dyn ArchiveStore>,
    acl: Arc<dyn AclStore>,
    perms: Arc<PermissionEvaluator>,
    pathing: PathRebuilder,
}

impl ArchiveService {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        assocs: Arc<dyn AssociationStore>,
        archive: Arc<dyn ArchiveStore>,
        acl: Arc<dyn AclStore>,
        perms: Arc<PermissionEvaluator>,
    ) -> Self {
        let pathing = PathRebuilder::new(nodes.clone(), assocs.clone(), acl.clone());
        Self {
            nodes,
            assocs,
            archive,
            acl,
            perms,
            pathing,
        }
    }

    async fn hard_parents_of(&self, internal_id: i64) -> ServiceResult<Vec<Association>> {
        Ok(self
            .assocs
            .find(AssocFilter::parents_of(internal_id).hard(), Page::all())
            .await?)
    }

    /// Move a node whose last hard parent was just severed, together with its
    /// hard-descendant closure, into the archive. `severed` holds the
    /// just-removed associations so restore can replay them. Returns the
    /// closure size.
    pub(crate) async fn archive_subtree(
        &self,
        ctx: &OpContext,
        root_uuid: Uuid,
        severed: Vec<Association>,
    ) -> ServiceResult<u64> {
        let root = self
            .nodes
            .find_by_uuid(&ctx.tenant, root_uuid, FetchOptions::DEFAULT)
            .await?
            .and_then(NodeRecord::into_active)
            .ok_or_else(|| {
                ServiceError::not_found(format!("node {}/{}", ctx.tenant, root_uuid))
            })?;
        let root_id = root.internal_id();

        // Closure fixpoint: a descendant joins when every hard parent it has
        // is already a member.
        let mut members: BTreeSet<i64> = BTreeSet::from([root_id]);
        loop {
            let mut added = false;
            for member in members.clone() {
                let children = self
                    .assocs
                    .find(AssocFilter::children_of(member).hard(), Page::all())
                    .await?;
                for assoc in children {
                    if members.contains(&assoc.child_id) {
                        continue;
                    }
                    let parents = self.hard_parents_of(assoc.child_id).await?;
                    if parents.iter().all(|p| members.contains(&p.parent_id)) {
                        members.insert(assoc.child_id);
                        added = true;
                    }
                }
            }
            if !added {
                break;
            }
        }

        let archive_txn = ctx.txn.id;

        // Capture phase: record every edge restore will need, before any
        // deletion touches the live tables.
        for assoc in &severed {
            self.archive
                .record(archive_txn, ArchivedAssociation::capture(assoc, false))
                .await?;
        }
        let mut boundary: BTreeSet<i64> = BTreeSet::new();
        for &member in &members {
            if member != root_id {
                for assoc in self.hard_parents_of(member).await? {
                    self.archive
                        .record(archive_txn, ArchivedAssociation::capture(&assoc, true))
                        .await?;
                }
            }
            let outgoing = self
                .assocs
                .find(AssocFilter::children_of(member), Page::all())
                .await?;
            for assoc in outgoing {
                if assoc.hard {
                    if !members.contains(&assoc.child_id) {
                        boundary.insert(assoc.child_id);
                    }
                } else {
                    self.archive
                        .record(archive_txn, ArchivedAssociation::capture(&assoc, true))
                        .await?;
                }
            }
        }

        // Detach phase: drop live edges and paths, swap lifecycle tags.
        for &member in &members {
            let active = self
                .nodes
                .find_by_internal_id(member, FetchOptions::DEFAULT)
                .await?
                .and_then(NodeRecord::into_active)
                .ok_or_else(|| {
                    ServiceError::not_found(format!("closure member {} vanished", member))
                })?;
            self.assocs.delete_for_node(member).await?;
            self.assocs.replace_paths(member, Vec::new()).await?;

            let mut archived = active.into_archived(archive_txn);
            if member == root_id {
                archived.core.add_aspect(ASPECT_ARCHIVE_ROOT);
            }
            archived.core.touch(ctx.txn.id);
            self.nodes
                .swap_lifecycle(NodeRecord::Archived(archived))
                .await?;
            self.nodes
                .set_transaction(member, ctx.txn.id, IndexHint::Removed)
                .await?;
            ctx.txn.counter.bump()?;
        }

        // Children that kept a hard parent outside the closure stay active;
        // promote a new primary where the archived edge was it.
        for child in boundary {
            let remaining = self.hard_parents_of(child).await?;
            if remaining.is_empty() {
                continue;
            }
            if !remaining.iter().any(|a| a.primary) {
                self.assocs.set_primary(remaining[0].id, true).await?;
            }
            self.pathing.rebuild_subtree(ctx, child).await?;
        }

        info!(
            root = %root.node_ref(),
            closure = members.len(),
            txn = %archive_txn,
            "archived node closure"
        );
        Ok(members.len() as u64)
    }

    /// Restore an archived node (and its archive closure) into the live
    /// graph, replaying recorded associations and rebuilding paths.
    ///
    /// Without an explicit destination, the first recorded association whose
    /// parent still resolves to an active node is used; Create permission is
    /// required on that parent. A closure member with no such association is
    /// not independently restorable until its closure root has been restored.
    pub async fn restore_node(
        &self,
        ctx: &OpContext,
        uuid: Uuid,
        destination: Option<Uuid>,
        mode: RestoreMode,
    ) -> ServiceResult<ActiveNode> {
        let record = self
            .nodes
            .find_by_uuid(&ctx.tenant, uuid, FetchOptions::DEFAULT)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("node {}/{}", ctx.tenant, uuid)))?;
        let archived = record.into_archived().ok_or_else(|| {
            ServiceError::precondition(format!("node {}/{} is not archived", ctx.tenant, uuid))
        })?;
        if !archived.core.has_aspect(ASPECT_ARCHIVED) {
            return Err(ServiceError::precondition(format!(
                "node {} does not carry the archived marker",
                archived.node_ref()
            )));
        }
        self.perms
            .require_archived(ctx, &archived, Permission::Read)
            .await?;

        let root_id = archived.internal_id();
        let recorded = self.archive.find_parent_associations(root_id, true).await?;

        // Resolve the destination before mutating anything.
        let template = recorded.first().cloned();
        let dest_parent = match destination {
            Some(dest_uuid) => {
                let parent = self
                    .nodes
                    .find_by_uuid(&ctx.tenant, dest_uuid, FetchOptions::SECURITY)
                    .await?
                    .and_then(NodeRecord::into_active)
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "destination {}/{}",
                            ctx.tenant, dest_uuid
                        ))
                    })?;
                self.perms
                    .require(ctx, &parent, Permission::CreateChild)
                    .await?;
                parent
            }
            None => {
                let mut found = None;
                for rec in &recorded {
                    let parent = self
                        .nodes
                        .find_by_internal_id(rec.parent_id, FetchOptions::SECURITY)
                        .await?
                        .and_then(NodeRecord::into_active);
                    if let Some(parent) = parent {
                        self.perms
                            .require(ctx, &parent, Permission::CreateChild)
                            .await?;
                        found = Some(parent);
                        break;
                    }
                }
                found.ok_or_else(|| {
                    ServiceError::precondition(format!(
                        "node {} has no restorable parent association; restore its closure root first",
                        archived.node_ref()
                    ))
                })?
            }
        };

        // Re-tag the whole closure so it re-enters the live graph together.
        let archive_txn = archived.archive_txn;
        let members = self
            .archive
            .restore_transaction(archive_txn, ctx.txn.id)
            .await?;
        ctx.txn.counter.bump_by(members.len() as u64)?;

        let mut closure_root = root_id;
        for &member in &members {
            let record = self
                .nodes
                .find_by_internal_id(member, FetchOptions::DEFAULT)
                .await?
                .ok_or_else(|| {
                    ServiceError::not_found(format!("closure member {} vanished", member))
                })?;
            if let NodeRecord::Archived(node) = record {
                if node.is_closure_root() {
                    closure_root = member;
                }
                let mut active = node.into_active();
                active.core.touch(ctx.txn.id);
                self.nodes.swap_lifecycle(NodeRecord::Active(active)).await?;
            }
        }

        // Primary association at the destination.
        let name = template
            .as_ref()
            .and_then(|t| t.name.clone())
            .or_else(|| archived.core.name().map(str::to_string));
        let type_name = template
            .as_ref()
            .map(|t| t.type_name.clone())
            .unwrap_or_else(|| ASSOC_TYPE_CONTAINS.to_string());
        let mut primary = Association::new(
            dest_parent.internal_id(),
            root_id,
            type_name,
            name,
            true,
        );
        primary.primary = true;
        self.assocs.create(primary).await?;

        // Secondary recorded parents of the root, when the mode asks.
        if mode == RestoreMode::All {
            for rec in recorded.iter().skip(1) {
                let parent = self
                    .nodes
                    .find_by_internal_id(rec.parent_id, FetchOptions::SECURITY)
                    .await?
                    .and_then(NodeRecord::into_active);
                let Some(parent) = parent else { continue };
                if parent.internal_id() == dest_parent.internal_id() {
                    continue;
                }
                self.perms
                    .require(ctx, &parent, Permission::CreateChild)
                    .await?;
                let assoc = Association::new(
                    rec.parent_id,
                    root_id,
                    rec.type_name.clone(),
                    rec.name.clone(),
                    true,
                );
                self.assocs.create(assoc).await?;
            }
        }

        // Closure-internal structure is always fully replayed. A recorded
        // parent that did not come back active (severed edge of a sibling
        // closure root) is skipped with a warning.
        for &member in &members {
            if member == root_id {
                continue;
            }
            for rec in self.archive.find_parent_associations(member, true).await? {
                let parent_active = self
                    .nodes
                    .find_by_internal_id(rec.parent_id, FetchOptions::DEFAULT)
                    .await?
                    .map(|r| r.as_active().is_some())
                    .unwrap_or(false);
                if !parent_active {
                    warn!(
                        parent = rec.parent_id,
                        child = member,
                        "skipping recorded association; parent is not active"
                    );
                    continue;
                }
                let mut assoc = Association::new(
                    rec.parent_id,
                    member,
                    rec.type_name.clone(),
                    rec.name.clone(),
                    true,
                );
                assoc.primary = rec.primary;
                self.assocs.create(assoc).await?;
            }
        }

        self.pathing.rebuild_subtree(ctx, closure_root).await?;
        if closure_root != root_id {
            self.pathing.rebuild_subtree(ctx, root_id).await?;
        }
        self.replay_soft_links(ctx).await?;
        self.archive.delete_closure(ctx.txn.id).await?;

        info!(
            node = %archived.node_ref(),
            members = members.len(),
            "restored node closure"
        );
        let restored = self
            .nodes
            .find_by_uuid(&ctx.tenant, uuid, FetchOptions::FULL)
            .await?
            .and_then(NodeRecord::into_active)
            .ok_or_else(|| {
                ServiceError::not_found(format!("restored node {}/{}", ctx.tenant, uuid))
            })?;
        Ok(restored)
    }

    /// Replay recorded soft outgoing associations under an admin-elevated
    /// force-new scope. Individual failures are logged, never fatal: a
    /// secondary link must not take the whole restore down, and a failure
    /// elsewhere must not roll these back.
    async fn replay_soft_links(&self, ctx: &OpContext) -> ServiceResult<()> {
        let replay_ctx = ctx.nested_as(Actor::system(), TxnJoin::ForceNew);
        let rows = self.archive.outgoing_soft_associations(ctx.txn.id).await?;
        for rec in rows {
            let assoc = Association::new(
                rec.parent_id,
                rec.child_id,
                rec.type_name.clone(),
                rec.name.clone(),
                false,
            );
            match self.assocs.create(assoc).await {
                Ok(_) => {
                    replay_ctx.txn.counter.bump()?;
                }
                Err(err) => {
                    warn!(
                        parent = rec.parent_id,
                        child = rec.child_id,
                        type_name = %rec.type_name,
                        error = %err,
                        "skipping soft association replay"
                    );
                }
            }
        }
        Ok(())
    }

    /// Purge an archived node: delete its archive bookkeeping and, with
    /// `remove` set, tombstone the underlying node rows. A closure root
    /// cascades over its whole closure. Returns the number of nodes purged.
    pub async fn purge_node(&self, ctx: &OpContext, uuid: Uuid, remove: bool) -> ServiceResult<u64> {
        let record = self
            .nodes
            .find_by_uuid(&ctx.tenant, uuid, FetchOptions::DEFAULT)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("node {}/{}", ctx.tenant, uuid)))?;
        let archived = record.into_archived().ok_or_else(|| {
            ServiceError::precondition(format!(
                "node {}/{} is not archived; only archived nodes can be purged",
                ctx.tenant, uuid
            ))
        })?;
        let node_id = archived.internal_id();

        // Delete permission comes from whichever side of each recorded parent
        // association still resolves.
        let recorded = self.archive.find_parent_associations(node_id, false).await?;
        if recorded.is_empty() {
            self.perms
                .require_archived(ctx, &archived, Permission::Delete)
                .await?;
        }
        for rec in &recorded {
            let live = self
                .nodes
                .find_by_internal_id(rec.parent_id, FetchOptions::SECURITY)
                .await?;
            let archived_parent = self.archive.get_node_by_id(rec.parent_id).await?;
            match (live.and_then(NodeRecord::into_active), archived_parent) {
                (Some(_), Some(_)) => {
                    return Err(ServiceError::conflict(format!(
                        "parent {} of node {} is both active and archived",
                        rec.parent_id,
                        archived.node_ref()
                    )));
                }
                (Some(parent), None) => {
                    self.perms.require(ctx, &parent, Permission::Delete).await?;
                }
                (None, Some(parent)) => {
                    self.perms
                        .require_archived(ctx, &parent, Permission::Delete)
                        .await?;
                }
                (None, None) => {
                    return Err(ServiceError::not_found(format!(
                        "parent {} of node {} resolves on neither side",
                        rec.parent_id,
                        archived.node_ref()
                    )));
                }
            }
        }

        let members = if archived.is_closure_root() {
            let members = self.archive.closure_members(archived.archive_txn).await?;
            self.archive.delete_closure(archived.archive_txn).await?;
            members
        } else {
            self.archive.delete_for_node(node_id).await?;
            vec![node_id]
        };

        if remove {
            for &member in &members {
                let Some(node) = self.archive.get_node_by_id(member).await? else {
                    continue;
                };
                if let Some(group) = self.acl.group_of_node(member).await? {
                    if group.managed {
                        self.acl.delete_group(group.id).await?;
                    }
                }
                let mut removed = node.into_removed();
                removed.core.touch(ctx.txn.id);
                self.nodes
                    .swap_lifecycle(NodeRecord::Removed(removed))
                    .await?;
                self.nodes
                    .set_transaction(member, ctx.txn.id, IndexHint::Removed)
                    .await?;
                ctx.txn.counter.bump()?;
            }
        } else {
            ctx.txn.counter.bump_by(members.len() as u64)?;
        }

        info!(
            node = %archived.node_ref(),
            members = members.len(),
            remove,
            "purged archived node"
        );
        Ok(members.len() as u64)
    }
}

#[cfg(test)]
#[path = "archive_service_test.rs"]
mod archive_service_test;
