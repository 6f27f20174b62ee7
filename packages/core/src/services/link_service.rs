//! Link Management - Association CRUD and Path Maintenance
//!
//! This module provides the graph-mutation surface of the engine:
//!
//! - Node creation under a parent (with managed security group and paths)
//! - Association create/remove/move/rename with cycle prevention
//! - Slash-path resolution with on-demand intermediate folder creation
//!
//! # Validation Order
//!
//! `create_link` validates strictly in this order: resolve all referenced
//! nodes (NotFound), default the relationship and type, require a non-blank
//! name for hierarchical edges (defaulted from the target's display name),
//! check permissions and acyclicity for hard edges, then handle duplicates.
//! Identical duplicate hard-parent requests are an idempotent no-op unless
//! duplicate rejection is configured.
//!
//! # Cycle Check
//!
//! The check never walks the graph: the candidate parent's primary path
//! already lists every ancestor-or-self id, so a prospective child is
//! rejected exactly when its own id occurs in that chain. O(path depth),
//! relying on paths being kept consistent by every prior mutation.
//!
//! # Archival Trigger
//!
//! Removing the last hard parent of a node hands the node (and its hard
//! descendant closure) to the archive service inside the same transaction.

use crate::db::{
    AssocFilter, AssociationStore, FetchOptions, NodeStore, Page, PathStore,
};
use crate::models::{
    ActiveNode, Association, ContentProperty, DeleteMode, NodeInfo, NodeRecord, Permission,
    Relationship, RenameMode, ASSOC_TYPE_CONTAINS, ASSOC_TYPE_REFERENCES, PROP_NAME, TYPE_FOLDER,
};
use crate::services::archive_service::ArchiveService;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::pathing::PathRebuilder;
use crate::services::permission_service::PermissionEvaluator;
use crate::txn::{IndexHint, OpContext};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Link service tuning.
#[derive(Debug, Clone, Default)]
pub struct LinkServiceConfig {
    /// Report identical duplicate hard-parent requests as BadRequest instead
    /// of the default idempotent no-op.
    pub reject_duplicate_links: bool,
}

/// The other endpoint of a link request.
#[derive(Debug, Clone)]
pub enum TargetRef {
    /// By uuid.
    Node(Uuid),
    /// By slash-separated path from the tenant root.
    Path(String),
}

/// A request to create one association.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    /// Role the subject plays; defaults to `Parent`.
    pub relationship: Option<Relationship>,
    pub target: TargetRef,
    /// Defaults to the containment type for hierarchical edges, the
    /// reference type otherwise.
    pub type_name: Option<String>,
    /// Defaults from the target's display name for hierarchical edges.
    pub name: Option<String>,
    /// Structural flag; soft unless explicitly set.
    pub hard: bool,
    /// Allow creating missing folders when the target is a path.
    pub create_intermediates: bool,
}

impl LinkRequest {
    /// Hard containment edge to the given node, subject as parent.
    pub fn hard_child(target: Uuid) -> Self {
        Self {
            relationship: Some(Relationship::Parent),
            target: TargetRef::Node(target),
            type_name: None,
            name: None,
            hard: true,
            create_intermediates: false,
        }
    }

    /// Hard containment edge placing the subject under the given parent.
    pub fn hard_parent(parent: Uuid) -> Self {
        Self {
            relationship: Some(Relationship::Child),
            target: TargetRef::Node(parent),
            type_name: None,
            name: None,
            hard: true,
            create_intermediates: false,
        }
    }

    /// Soft reference edge from the subject to the given node.
    pub fn reference(target: Uuid) -> Self {
        Self {
            relationship: Some(Relationship::Source),
            target: TargetRef::Node(target),
            type_name: None,
            name: None,
            hard: false,
            create_intermediates: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Parameters for creating a node under a parent.
#[derive(Debug, Clone)]
pub struct CreateNodeRequest {
    pub type_name: String,
    /// Display name; also the containment association name. Falls back to
    /// the `"name"` property.
    pub name: Option<String>,
    pub properties: Map<String, Value>,
    pub aspects: Vec<String>,
    pub content: Vec<ContentProperty>,
}

impl CreateNodeRequest {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            type_name: TYPE_FOLDER.to_string(),
            name: Some(name.into()),
            properties: Map::new(),
            aspects: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn document(name: impl Into<String>) -> Self {
        Self {
            type_name: crate::models::TYPE_DOCUMENT.to_string(),
            name: Some(name.into()),
            properties: Map::new(),
            aspects: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// Association management over the live graph.
pub struct LinkService {
    nodes: Arc<dyn NodeStore>,
    assocs: Arc<dyn AssociationStore>,
    paths: Arc<dyn PathStore>,
    perms: Arc<PermissionEvaluator>,
    archive: Arc<ArchiveService>,
    pathing: PathRebuilder,
    config: LinkServiceConfig,
}

impl LinkService {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        assocs: Arc<dyn AssociationStore>,
        acl: Arc<dyn crate::db::AclStore>,
        paths: Arc<dyn PathStore>,
        perms: Arc<PermissionEvaluator>,
        archive: Arc<ArchiveService>,
        config: LinkServiceConfig,
    ) -> Self {
        let pathing = PathRebuilder::new(nodes.clone(), assocs.clone(), acl);
        Self {
            nodes,
            assocs,
            paths,
            perms,
            archive,
            pathing,
            config,
        }
    }

    /// The tenant's root folder, created on first use.
    pub async fn ensure_root(&self, ctx: &OpContext) -> ServiceResult<ActiveNode> {
        if let Some(root) = self.nodes.find_root(&ctx.tenant).await? {
            return Ok(root);
        }
        let node = ActiveNode::new(&ctx.tenant, TYPE_FOLDER, &ctx.actor.name, ctx.txn.id)
            .with_name(ctx.tenant.clone());
        let mut created = self.nodes.create_root(node).await?;
        let group = self.perms.ensure_managed_group(&created).await?;
        created.security_group = Some(group.id);
        let created = self.nodes.update(created).await?;
        self.pathing.install_root_path(&created).await?;
        self.nodes
            .set_transaction(created.internal_id(), ctx.txn.id, IndexHint::Created)
            .await?;
        ctx.txn.counter.bump()?;
        info!(tenant = %ctx.tenant, root = %created.node_ref(), "created tenant root");
        Ok(created)
    }

    /// Create a node under a parent: managed security group, hard primary
    /// containment association, derived paths.
    pub async fn create_node(
        &self,
        ctx: &OpContext,
        parent_uuid: Uuid,
        req: CreateNodeRequest,
    ) -> ServiceResult<ActiveNode> {
        let parent = self.require_active(ctx, parent_uuid, FetchOptions::FULL).await?;
        self.perms
            .require(ctx, &parent, Permission::CreateChild)
            .await?;

        let name = req
            .name
            .clone()
            .or_else(|| {
                req.properties
                    .get(PROP_NAME)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::bad_request("node creation requires a non-blank name")
            })?;
        self.check_child_name_free(&parent, &name).await?;

        let mut node = ActiveNode::new(
            &ctx.tenant,
            req.type_name.clone(),
            &ctx.actor.name,
            ctx.txn.id,
        );
        node.core.properties = req.properties;
        node.core
            .properties
            .insert(PROP_NAME.to_string(), Value::String(name.clone()));
        for aspect in req.aspects {
            node.core.add_aspect(aspect);
        }
        node.core.content = req.content;

        let mut node = self.nodes.create(node).await?;
        let group = self.perms.ensure_managed_group(&node).await?;
        node.security_group = Some(group.id);
        let node = self.nodes.update(node).await?;

        let mut assoc = Association::new(
            parent.internal_id(),
            node.internal_id(),
            ASSOC_TYPE_CONTAINS,
            Some(name),
            true,
        );
        assoc.primary = true;
        self.assocs.create(assoc).await?;

        let paths = self.pathing.derive_paths(node.internal_id()).await?;
        self.assocs.replace_paths(node.internal_id(), paths).await?;
        self.nodes
            .set_transaction(node.internal_id(), ctx.txn.id, IndexHint::Created)
            .await?;
        self.nodes
            .set_transaction(parent.internal_id(), ctx.txn.id, IndexHint::Updated)
            .await?;
        ctx.txn.counter.bump()?;

        debug!(node = %node.node_ref(), parent = %parent.node_ref(), "created node");
        self.require_active(ctx, node.node_ref().id, FetchOptions::FULL)
            .await
    }

    /// Create one association per the request.
    pub async fn create_link(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        req: LinkRequest,
    ) -> ServiceResult<Association> {
        let subject = self.require_active(ctx, subject_uuid, FetchOptions::FULL).await?;
        let target = self.resolve_target(ctx, &req).await?;

        let rel = req.relationship.unwrap_or(Relationship::Parent);
        if req.hard && !rel.is_hierarchical() {
            return Err(ServiceError::bad_request(
                "a reference association cannot be hard",
            ));
        }
        let type_name = req.type_name.clone().unwrap_or_else(|| {
            if rel.is_hierarchical() {
                ASSOC_TYPE_CONTAINS.to_string()
            } else {
                ASSOC_TYPE_REFERENCES.to_string()
            }
        });

        let (parent, child) = match rel {
            Relationship::Parent | Relationship::Source => (&subject, &target),
            Relationship::Child | Relationship::Target => (&target, &subject),
        };

        let name = if rel.is_hierarchical() {
            Some(self.hierarchical_name(&req, child)?)
        } else {
            req.name.clone()
        };

        if req.hard {
            self.create_hard_association(ctx, parent, child, type_name, name, true)
                .await
        } else {
            self.create_soft_association(ctx, parent, child, type_name, name)
                .await
        }
    }

    /// Create several associations for one subject in one call. Duplicate
    /// hierarchical names within the batch are rejected up front.
    pub async fn create_links(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        requests: Vec<LinkRequest>,
    ) -> ServiceResult<Vec<Association>> {
        let mut seen = HashSet::new();
        for req in &requests {
            let hierarchical = req
                .relationship
                .unwrap_or(Relationship::Parent)
                .is_hierarchical();
            if hierarchical {
                if let Some(name) = &req.name {
                    if !seen.insert(name.clone()) {
                        return Err(ServiceError::bad_request(format!(
                            "duplicate association name '{}' within one call",
                            name
                        )));
                    }
                }
            }
        }
        let mut created = Vec::with_capacity(requests.len());
        for req in requests {
            created.push(self.create_link(ctx, subject_uuid, req).await?);
        }
        Ok(created)
    }

    /// Remove the hard association between `parent_uuid` and the subject.
    /// Returns false when delete-if-expired found the node not yet due.
    ///
    /// When the last hard parent goes, the subject and its hard-descendant
    /// closure transition to the archive inside this same transaction.
    pub async fn remove_link(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        parent_uuid: Uuid,
        mode: DeleteMode,
    ) -> ServiceResult<bool> {
        let subject = self.require_active(ctx, subject_uuid, FetchOptions::FULL).await?;
        let parent = self.require_active(ctx, parent_uuid, FetchOptions::DEFAULT).await?;

        let hard_parents = self.hard_parents_of(subject.internal_id()).await?;
        let assoc = hard_parents
            .iter()
            .find(|a| a.parent_id == parent.internal_id())
            .cloned()
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "hard association {} -> {}",
                    parent.node_ref(),
                    subject.node_ref()
                ))
            })?;

        if mode == DeleteMode::DeleteIfExpired && !Self::is_expired(&subject) {
            debug!(node = %subject.node_ref(), "not yet expired; leaving link in place");
            return Ok(false);
        }
        self.perms.require(ctx, &subject, Permission::Delete).await?;

        self.assocs.delete(assoc.id).await?;
        ctx.txn.counter.bump()?;
        self.nodes
            .set_transaction(parent.internal_id(), ctx.txn.id, IndexHint::Updated)
            .await?;
        self.after_hard_parent_removed(ctx, &subject, vec![assoc]).await?;
        Ok(true)
    }

    /// Remove every hard parent association of the subject, archiving it with
    /// its closure. Returns the number of associations removed.
    pub async fn remove_all_links(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        mode: DeleteMode,
    ) -> ServiceResult<u64> {
        let subject = self.require_active(ctx, subject_uuid, FetchOptions::FULL).await?;
        let hard_parents = self.hard_parents_of(subject.internal_id()).await?;
        if hard_parents.is_empty() {
            return Ok(0);
        }
        if mode == DeleteMode::DeleteIfExpired && !Self::is_expired(&subject) {
            debug!(node = %subject.node_ref(), "not yet expired; leaving links in place");
            return Ok(0);
        }
        self.perms.require(ctx, &subject, Permission::Delete).await?;

        for assoc in &hard_parents {
            self.assocs.delete(assoc.id).await?;
            ctx.txn.counter.bump()?;
            self.nodes
                .set_transaction(assoc.parent_id, ctx.txn.id, IndexHint::Updated)
                .await?;
        }
        let removed = hard_parents.len() as u64;
        self.after_hard_parent_removed(ctx, &subject, hard_parents).await?;
        Ok(removed)
    }

    /// Atomically create the destination hard association and remove the
    /// explicit (or inferred primary) source association.
    ///
    /// Creation runs first with full validation; any failure there leaves the
    /// source association untouched. The destination must make the subject a
    /// child of a hard edge.
    pub async fn move_link(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        source_parent: Option<Uuid>,
        dest: LinkRequest,
    ) -> ServiceResult<Association> {
        let subject = self.require_active(ctx, subject_uuid, FetchOptions::FULL).await?;

        let rel = dest.relationship.unwrap_or(Relationship::Child);
        if rel != Relationship::Child {
            return Err(ServiceError::bad_request(
                "move destination must place the subject as a child",
            ));
        }
        if !dest.hard {
            return Err(ServiceError::bad_request(
                "move requires a hard destination association",
            ));
        }

        let hard_parents = self.hard_parents_of(subject.internal_id()).await?;
        let source_assoc = match source_parent {
            Some(parent_uuid) => {
                let parent = self
                    .require_active(ctx, parent_uuid, FetchOptions::DEFAULT)
                    .await?;
                hard_parents
                    .iter()
                    .find(|a| a.parent_id == parent.internal_id())
                    .cloned()
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "hard association {} -> {}",
                            parent.node_ref(),
                            subject.node_ref()
                        ))
                    })?
            }
            None => hard_parents
                .iter()
                .find(|a| a.primary)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::not_found(format!(
                        "primary parent association of {}",
                        subject.node_ref()
                    ))
                })?,
        };

        self.perms.require(ctx, &subject, Permission::Delete).await?;

        let old_primary_path = self
            .assocs
            .paths_of(subject.internal_id())
            .await?
            .into_iter()
            .find(|p| p.primary)
            .ok_or_else(|| {
                ServiceError::not_found(format!("primary path of {}", subject.node_ref()))
            })?;

        // Destination first: validation failure must not orphan the subject.
        let dest_parent = self.resolve_target(ctx, &dest).await?;
        let type_name = dest
            .type_name
            .clone()
            .unwrap_or_else(|| ASSOC_TYPE_CONTAINS.to_string());
        let name = Some(self.hierarchical_name(&dest, &subject)?);
        let created = self
            .create_hard_association(ctx, &dest_parent, &subject, type_name, name, false)
            .await?;
        if created.id == source_assoc.id {
            return Ok(created);
        }

        self.assocs.delete(source_assoc.id).await?;
        ctx.txn.counter.bump()?;
        self.nodes
            .set_transaction(source_assoc.parent_id, ctx.txn.id, IndexHint::Updated)
            .await?;
        self.nodes
            .set_transaction(dest_parent.internal_id(), ctx.txn.id, IndexHint::Updated)
            .await?;

        if source_assoc.primary {
            self.assocs.set_primary(created.id, true).await?;

            // Reparent propagation: rewrite ancestor and sg prefixes of the
            // whole moved subtree as one batch.
            let dest_paths = self.assocs.paths_of(dest_parent.internal_id()).await?;
            let dest_primary = dest_paths.iter().find(|p| p.primary).ok_or_else(|| {
                ServiceError::not_found(format!("primary path of {}", dest_parent.node_ref()))
            })?;
            let new_ancestors = dest_primary.ancestors.child(subject.internal_id());
            let inherits = self.perms.node_inherits(subject.internal_id()).await?;
            let new_sg = if inherits {
                dest_primary.sg_chain.child(subject.internal_id())
            } else {
                crate::models::AncestorChain::from_ids(vec![subject.internal_id()])
            };
            self.perms
                .propagate_reparent(
                    ctx,
                    &old_primary_path.ancestors,
                    &new_ancestors,
                    &old_primary_path.sg_chain,
                    &new_sg,
                )
                .await?;
        } else {
            self.pathing.rebuild_subtree(ctx, subject.internal_id()).await?;
        }

        info!(
            subject = %subject.node_ref(),
            from = source_assoc.parent_id,
            to = dest_parent.internal_id(),
            "moved node"
        );
        let mut moved = created;
        moved.primary = source_assoc.primary;
        Ok(moved)
    }

    /// Rename one association by row id. Requires Write on the child side.
    pub async fn rename_link(
        &self,
        ctx: &OpContext,
        assoc_id: Uuid,
        name: &str,
    ) -> ServiceResult<()> {
        if name.trim().is_empty() {
            return Err(crate::models::ValidationError::BlankName.into());
        }
        let assoc = self
            .assocs
            .get(assoc_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("association {}", assoc_id)))?;
        let child = self.require_active_by_internal(ctx, assoc.child_id).await?;
        self.perms.require(ctx, &child, Permission::Write).await?;
        if assoc.hard {
            let parent = self.require_active_by_internal(ctx, assoc.parent_id).await?;
            if assoc.name.as_deref() != Some(name) {
                self.check_child_name_free(&parent, name).await?;
            }
        }
        self.assocs.rename(assoc_id, name).await?;
        self.nodes
            .set_transaction(assoc.child_id, ctx.txn.id, IndexHint::Updated)
            .await?;
        ctx.txn.counter.bump()?;
        Ok(())
    }

    /// Rename the subject's hard parent association(s). `First` renames the
    /// first found in store order; `All` renames every one. Errors NotFound
    /// when the subject has no hard parent association.
    pub async fn rename_links(
        &self,
        ctx: &OpContext,
        subject_uuid: Uuid,
        name: &str,
        mode: RenameMode,
    ) -> ServiceResult<u64> {
        if name.trim().is_empty() {
            return Err(crate::models::ValidationError::BlankName.into());
        }
        let subject = self.require_active(ctx, subject_uuid, FetchOptions::FULL).await?;
        let hard_parents = self.hard_parents_of(subject.internal_id()).await?;
        if hard_parents.is_empty() {
            return Err(ServiceError::not_found(format!(
                "hard parent associations of {}",
                subject.node_ref()
            )));
        }
        self.perms.require(ctx, &subject, Permission::Write).await?;

        let targets: Vec<&Association> = match mode {
            RenameMode::First => vec![&hard_parents[0]],
            RenameMode::All => hard_parents.iter().collect(),
        };
        let mut renamed = 0u64;
        for assoc in targets {
            if assoc.name.as_deref() == Some(name) {
                continue;
            }
            let parent = self.require_active_by_internal(ctx, assoc.parent_id).await?;
            self.check_child_name_free(&parent, name).await?;
            self.assocs.rename(assoc.id, name).await?;
            renamed += 1;
            ctx.txn.counter.bump()?;
        }
        if renamed > 0 {
            self.nodes
                .set_transaction(subject.internal_id(), ctx.txn.id, IndexHint::Updated)
                .await?;
        }
        Ok(renamed)
    }

    /// Resolve a slash path from the tenant root, optionally creating missing
    /// folders along the remainder.
    pub async fn resolve_path(
        &self,
        ctx: &OpContext,
        path: &str,
        create_missing: bool,
    ) -> ServiceResult<ActiveNode> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let located = self.paths.find_longest_path_node(&ctx.tenant, &segments).await?;
        let (deepest, matched) = match located {
            Some(hit) => hit,
            None => {
                if !create_missing {
                    return Err(ServiceError::not_found(format!(
                        "tenant '{}' has no root",
                        ctx.tenant
                    )));
                }
                let root = self.ensure_root(ctx).await?;
                (root.internal_id(), 0)
            }
        };

        let mut current = self.require_active_by_internal(ctx, deepest).await?;
        if matched == segments.len() {
            return Ok(current);
        }
        if !create_missing {
            return Err(ServiceError::not_found(format!("path '{}'", path)));
        }
        for segment in &segments[matched..] {
            current = self
                .create_node(
                    ctx,
                    current.node_ref().id,
                    CreateNodeRequest::folder(segment.clone()),
                )
                .await?;
        }
        Ok(current)
    }

    //
    // INTERNAL
    //

    async fn resolve_target(&self, ctx: &OpContext, req: &LinkRequest) -> ServiceResult<ActiveNode> {
        match &req.target {
            TargetRef::Node(uuid) => self.require_active(ctx, *uuid, FetchOptions::FULL).await,
            TargetRef::Path(path) => self.resolve_path(ctx, path, req.create_intermediates).await,
        }
    }

    fn hierarchical_name(&self, req: &LinkRequest, child: &ActiveNode) -> ServiceResult<String> {
        req.name
            .clone()
            .or_else(|| child.core.name().map(str::to_string))
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::bad_request(format!(
                    "hierarchical association to {} requires a non-blank name",
                    child.node_ref()
                ))
            })
    }

    async fn hard_parents_of(&self, internal_id: i64) -> ServiceResult<Vec<Association>> {
        Ok(self
            .assocs
            .find(AssocFilter::parents_of(internal_id).hard(), Page::all())
            .await?)
    }

    async fn check_child_name_free(&self, parent: &ActiveNode, name: &str) -> ServiceResult<()> {
        let clash = self
            .assocs
            .find(
                AssocFilter::children_of(parent.internal_id()).hard().named(name),
                Page::first(1),
            )
            .await?;
        if clash.is_empty() {
            return Ok(());
        }
        Err(ServiceError::bad_request(format!(
            "{} already has a hard child named '{}'",
            parent.node_ref(),
            name
        )))
    }

    async fn create_hard_association(
        &self,
        ctx: &OpContext,
        parent: &ActiveNode,
        child: &ActiveNode,
        type_name: String,
        name: Option<String>,
        rebuild_paths: bool,
    ) -> ServiceResult<Association> {
        self.perms
            .require(ctx, parent, Permission::CreateChild)
            .await?;

        // Cycle check over the parent's primary path ancestor ids.
        let parent_paths = self.assocs.paths_of(parent.internal_id()).await?;
        let parent_primary = parent_paths.iter().find(|p| p.primary).ok_or_else(|| {
            ServiceError::not_found(format!("primary path of {}", parent.node_ref()))
        })?;
        if parent_primary.ancestors.contains(child.internal_id()) {
            return Err(ServiceError::bad_request(format!(
                "association {} -> {} would make a node its own ancestor",
                parent.node_ref(),
                child.node_ref()
            )));
        }

        let existing = self.hard_parents_of(child.internal_id()).await?;
        let mut candidate = Association::new(
            parent.internal_id(),
            child.internal_id(),
            type_name,
            name,
            true,
        );
        if let Some(duplicate) = existing.iter().find(|a| a.same_edge(&candidate)) {
            if self.config.reject_duplicate_links {
                return Err(ServiceError::bad_request(format!(
                    "association {} -> {} already exists",
                    parent.node_ref(),
                    child.node_ref()
                )));
            }
            debug!(
                parent = %parent.node_ref(),
                child = %child.node_ref(),
                "duplicate hard association request; returning existing"
            );
            return Ok(duplicate.clone());
        }
        if let Some(n) = &candidate.name {
            self.check_child_name_free(parent, n).await?;
        }

        candidate.primary = !existing.iter().any(|a| a.primary);
        let created = self.assocs.create(candidate).await?;
        ctx.txn.counter.bump()?;
        if rebuild_paths {
            self.pathing.rebuild_subtree(ctx, child.internal_id()).await?;
        }
        self.nodes
            .set_transaction(parent.internal_id(), ctx.txn.id, IndexHint::Updated)
            .await?;
        Ok(created)
    }

    async fn create_soft_association(
        &self,
        ctx: &OpContext,
        source: &ActiveNode,
        target: &ActiveNode,
        type_name: String,
        name: Option<String>,
    ) -> ServiceResult<Association> {
        self.perms.require(ctx, source, Permission::Write).await?;
        let assoc = Association::new(
            source.internal_id(),
            target.internal_id(),
            type_name,
            name,
            false,
        );
        let created = self.assocs.create(assoc).await?;
        ctx.txn.counter.bump()?;
        self.nodes
            .set_transaction(source.internal_id(), ctx.txn.id, IndexHint::Updated)
            .await?;
        Ok(created)
    }

    /// Post-removal bookkeeping: archive on zero hard parents, otherwise
    /// promote a new primary and rebuild the subtree's paths.
    async fn after_hard_parent_removed(
        &self,
        ctx: &OpContext,
        subject: &ActiveNode,
        severed: Vec<Association>,
    ) -> ServiceResult<()> {
        let remaining = self.hard_parents_of(subject.internal_id()).await?;
        if remaining.is_empty() {
            info!(node = %subject.node_ref(), "last hard parent severed; archiving");
            self.archive
                .archive_subtree(ctx, subject.node_ref().id, severed)
                .await?;
            return Ok(());
        }
        if severed.iter().any(|a| a.primary) && !remaining.iter().any(|a| a.primary) {
            self.assocs.set_primary(remaining[0].id, true).await?;
        }
        self.pathing.rebuild_subtree(ctx, subject.internal_id()).await?;
        Ok(())
    }

    fn is_expired(node: &ActiveNode) -> bool {
        node.core
            .expires_at()
            .map(|due| due <= Utc::now())
            .unwrap_or(false)
    }

    async fn require_active(
        &self,
        ctx: &OpContext,
        uuid: Uuid,
        opts: FetchOptions,
    ) -> ServiceResult<ActiveNode> {
        let record = self
            .nodes
            .find_by_uuid(&ctx.tenant, uuid, opts)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("node {}/{}", ctx.tenant, uuid)))?;
        match record {
            NodeRecord::Active(node) => Ok(node),
            other => Err(ServiceError::precondition(format!(
                "node {}/{} is {}, not active",
                ctx.tenant,
                uuid,
                other.lifecycle()
            ))),
        }
    }

    async fn require_active_by_internal(
        &self,
        ctx: &OpContext,
        internal_id: i64,
    ) -> ServiceResult<ActiveNode> {
        let record = self
            .nodes
            .find_by_internal_id(internal_id, FetchOptions::FULL)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("node #{}", internal_id)))?;
        record.into_active().ok_or_else(|| {
            ServiceError::precondition(format!(
                "node #{} in tenant '{}' is not active",
                internal_id, ctx.tenant
            ))
        })
    }
}

#[cfg(test)]
#[path = "link_service_test.rs"]
mod link_service_test;
