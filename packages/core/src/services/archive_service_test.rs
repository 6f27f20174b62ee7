//! Archive Service Tests
//!
//! Lifecycle state machine coverage: closure capture on last-hard-parent
//! removal, exact restore, the closure-member ordering dependency, purge in
//! both modes, and soft-link replay tolerance.

use crate::db::{
    AclStore, ArchiveStore, AssocFilter, AssociationStore, FetchOptions, MemoryStore, NodeStore,
    Page, PathStore,
};
use crate::models::{
    AccessRule, DeleteMode, Lifecycle, NodeInfo, Permission, ASPECT_ARCHIVE_ROOT,
};
use crate::services::{
    ArchiveService, CreateNodeRequest, LinkRequest, LinkService, LinkServiceConfig,
    PermissionEvaluator, RestoreMode, ServiceError,
};
use crate::txn::{Actor, OpContext};
use std::sync::Arc;
use uuid::Uuid;

struct TestBed {
    store: Arc<MemoryStore>,
    perms: Arc<PermissionEvaluator>,
    archive: Arc<ArchiveService>,
    links: Arc<LinkService>,
}

fn services() -> TestBed {
    let store = Arc::new(MemoryStore::new());
    let nodes: Arc<dyn NodeStore> = store.clone();
    let assocs: Arc<dyn AssociationStore> = store.clone();
    let archive_store: Arc<dyn ArchiveStore> = store.clone();
    let acl: Arc<dyn AclStore> = store.clone();
    let paths: Arc<dyn PathStore> = store.clone();

    let perms = Arc::new(PermissionEvaluator::new(
        nodes.clone(),
        assocs.clone(),
        acl.clone(),
        paths.clone(),
    ));
    let archive = Arc::new(ArchiveService::new(
        nodes.clone(),
        assocs.clone(),
        archive_store,
        acl.clone(),
        perms.clone(),
    ));
    let links = Arc::new(LinkService::new(
        nodes,
        assocs,
        acl,
        paths,
        perms.clone(),
        archive.clone(),
        LinkServiceConfig::default(),
    ));
    TestBed {
        store,
        perms,
        archive,
        links,
    }
}

fn admin_ctx() -> OpContext {
    OpContext::new("acme", Actor::system())
}

async fn lifecycle_of(bed: &TestBed, uuid: Uuid) -> Lifecycle {
    bed.store
        .find_by_uuid("acme", uuid, FetchOptions::DEFAULT)
        .await
        .unwrap()
        .expect("node record exists")
        .lifecycle()
}

#[tokio::test]
async fn removing_last_hard_parent_archives_the_closure() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("reports"))
        .await
        .unwrap();
    let d1 = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("q1.pdf"))
        .await
        .unwrap();

    let removed = bed
        .links
        .remove_link(&ctx, f1.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();
    assert!(removed);

    assert_eq!(lifecycle_of(&bed, f1.node_ref().id).await, Lifecycle::Archived);
    assert_eq!(lifecycle_of(&bed, d1.node_ref().id).await, Lifecycle::Archived);

    // Same archive transaction; only the root of the closure is marked.
    let f1_arch = bed
        .store
        .get_node("acme", f1.node_ref().id)
        .await
        .unwrap()
        .unwrap();
    let d1_arch = bed
        .store
        .get_node("acme", d1.node_ref().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(f1_arch.archive_txn, d1_arch.archive_txn);
    assert!(f1_arch.core.has_aspect(ASPECT_ARCHIVE_ROOT));
    assert!(!d1_arch.core.has_aspect(ASPECT_ARCHIVE_ROOT));

    // The live graph no longer sees either node.
    let live = bed
        .store
        .find(AssocFilter::parents_of(d1.internal_id()), Page::all())
        .await
        .unwrap();
    assert!(live.is_empty());
    assert!(bed.store.paths_of(f1.internal_id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn closure_member_is_not_restorable_before_its_root() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("reports"))
        .await
        .unwrap();
    let d1 = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("q1.pdf"))
        .await
        .unwrap();
    bed.links
        .remove_link(&ctx, f1.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // D1's only recorded hard parent is F1, itself archived.
    let err = bed
        .archive
        .restore_node(&ctx, d1.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed { .. }), "{err:?}");

    // Restoring F1 brings the whole closure back; D1 is active again.
    bed.archive
        .restore_node(&ctx, f1.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap();
    assert_eq!(lifecycle_of(&bed, d1.node_ref().id).await, Lifecycle::Active);
}

#[tokio::test]
async fn archive_restore_round_trip_reproduces_associations() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("reports"))
        .await
        .unwrap();
    let d1 = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("q1.pdf"))
        .await
        .unwrap();

    let snapshot = |assocs: Vec<crate::models::Association>| {
        let mut edges: Vec<(i64, i64, String, Option<String>, bool)> = assocs
            .into_iter()
            .map(|a| (a.parent_id, a.child_id, a.type_name, a.name, a.hard))
            .collect();
        edges.sort();
        edges
    };
    let before_f1 = snapshot(
        bed.store
            .find(AssocFilter::parents_of(f1.internal_id()), Page::all())
            .await
            .unwrap(),
    );
    let before_d1 = snapshot(
        bed.store
            .find(AssocFilter::parents_of(d1.internal_id()), Page::all())
            .await
            .unwrap(),
    );

    bed.links
        .remove_link(&ctx, f1.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();
    let restored = bed
        .archive
        .restore_node(&ctx, f1.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap();
    assert_eq!(restored.node_ref().id, f1.node_ref().id);

    let after_f1 = snapshot(
        bed.store
            .find(AssocFilter::parents_of(f1.internal_id()), Page::all())
            .await
            .unwrap(),
    );
    let after_d1 = snapshot(
        bed.store
            .find(AssocFilter::parents_of(d1.internal_id()), Page::all())
            .await
            .unwrap(),
    );
    assert_eq!(before_f1, after_f1);
    assert_eq!(before_d1, after_d1);

    // Paths re-derived for the whole subtree.
    let d1_paths = bed.store.paths_of(d1.internal_id()).await.unwrap();
    let primary = d1_paths.iter().find(|p| p.primary).unwrap();
    assert_eq!(
        primary.ancestors.ids(),
        &[root.internal_id(), f1.internal_id(), d1.internal_id()]
    );

    // The consumed bookkeeping is gone: archiving again starts clean.
    let recorded = bed
        .store
        .find_parent_associations(f1.internal_id(), true)
        .await
        .unwrap();
    assert!(recorded.is_empty());
}

#[tokio::test]
async fn restore_to_explicit_destination() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("f1"))
        .await
        .unwrap();
    let other = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("other"))
        .await
        .unwrap();
    let doc = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("d"))
        .await
        .unwrap();

    bed.links
        .remove_link(&ctx, doc.node_ref().id, f1.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();
    bed.archive
        .restore_node(
            &ctx,
            doc.node_ref().id,
            Some(other.node_ref().id),
            RestoreMode::PrimaryOnly,
        )
        .await
        .unwrap();

    let parents = bed
        .store
        .find(AssocFilter::parents_of(doc.internal_id()).hard(), Page::all())
        .await
        .unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].parent_id, other.internal_id());
    assert!(parents[0].primary);
}

#[tokio::test]
async fn restore_requires_read_and_the_archived_marker() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let doc = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::document("d"))
        .await
        .unwrap();

    // Restoring an active node is a precondition failure.
    let err = bed
        .archive
        .restore_node(&ctx, doc.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed { .. }));

    bed.links
        .remove_link(&ctx, doc.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // A stranger without Read on the archived node is refused.
    let bob = OpContext::new("acme", Actor::named("bob"));
    let err = bed
        .archive
        .restore_node(&bob, doc.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden { .. }));

    // A missing node is NotFound, not a precondition failure.
    let err = bed
        .archive
        .restore_node(&ctx, Uuid::new_v4(), None, RestoreMode::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn soft_links_are_replayed_and_failures_tolerated() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let folder = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("f"))
        .await
        .unwrap();
    let doc = bed
        .links
        .create_node(&ctx, folder.node_ref().id, CreateNodeRequest::document("d"))
        .await
        .unwrap();
    let cited = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::document("cited"))
        .await
        .unwrap();
    let gone = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::document("gone"))
        .await
        .unwrap();

    bed.links
        .create_link(&ctx, doc.node_ref().id, LinkRequest::reference(cited.node_ref().id))
        .await
        .unwrap();
    bed.links
        .create_link(&ctx, doc.node_ref().id, LinkRequest::reference(gone.node_ref().id))
        .await
        .unwrap();

    bed.links
        .remove_link(&ctx, folder.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // One reference target disappears entirely while the closure is archived.
    bed.links
        .remove_link(&ctx, gone.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();
    bed.archive
        .purge_node(&ctx, gone.node_ref().id, true)
        .await
        .unwrap();

    // Restore succeeds; the surviving reference is replayed, the dead one is
    // skipped with a warning.
    bed.archive
        .restore_node(&ctx, folder.node_ref().id, None, RestoreMode::All)
        .await
        .unwrap();

    let outgoing = bed
        .store
        .find(AssocFilter::children_of(doc.internal_id()), Page::all())
        .await
        .unwrap();
    let soft: Vec<_> = outgoing.iter().filter(|a| !a.hard).collect();
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].child_id, cited.internal_id());
}

#[tokio::test]
async fn purge_deletes_bookkeeping_and_optionally_nodes() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("f1"))
        .await
        .unwrap();
    let d1 = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("d1"))
        .await
        .unwrap();
    bed.links
        .remove_link(&ctx, f1.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // Bookkeeping-only purge: records go, nodes stay archived.
    let purged = bed.archive.purge_node(&ctx, f1.node_ref().id, false).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(lifecycle_of(&bed, f1.node_ref().id).await, Lifecycle::Archived);
    assert!(bed
        .store
        .find_parent_associations(d1.internal_id(), false)
        .await
        .unwrap()
        .is_empty());

    // Full purge tombstones the closure.
    let purged = bed.archive.purge_node(&ctx, f1.node_ref().id, true).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(lifecycle_of(&bed, f1.node_ref().id).await, Lifecycle::Removed);
    assert_eq!(lifecycle_of(&bed, d1.node_ref().id).await, Lifecycle::Removed);
}

#[tokio::test]
async fn purge_rejects_active_nodes() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let doc = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::document("d"))
        .await
        .unwrap();
    let err = bed
        .archive
        .purge_node(&ctx, doc.node_ref().id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed { .. }));
}

#[tokio::test]
async fn purge_checks_delete_on_the_resolvable_side() {
    let bed = services();
    let admin = admin_ctx();

    let root = bed.links.ensure_root(&admin).await.unwrap();
    let doc = bed
        .links
        .create_node(&admin, root.node_ref().id, CreateNodeRequest::document("d"))
        .await
        .unwrap();
    bed.perms
        .add_rule(
            &admin,
            root.node_ref().id,
            AccessRule::new("bob", Permission::Read.into()),
        )
        .await
        .unwrap();
    bed.links
        .remove_link(&admin, doc.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // The recorded parent (the root) is active; bob lacks Delete there.
    let bob = OpContext::new("acme", Actor::named("bob"));
    let err = bed
        .archive
        .purge_node(&bob, doc.node_ref().id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden { .. }));
}

#[tokio::test]
async fn boundary_child_with_outside_parent_stays_active() {
    let bed = services();
    let ctx = admin_ctx();

    let root = bed.links.ensure_root(&ctx).await.unwrap();
    let f1 = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("f1"))
        .await
        .unwrap();
    let keep = bed
        .links
        .create_node(&ctx, root.node_ref().id, CreateNodeRequest::folder("keep"))
        .await
        .unwrap();
    let shared = bed
        .links
        .create_node(&ctx, f1.node_ref().id, CreateNodeRequest::document("shared"))
        .await
        .unwrap();
    bed.links
        .create_link(
            &ctx,
            shared.node_ref().id,
            LinkRequest::hard_parent(keep.node_ref().id).named("shared-too"),
        )
        .await
        .unwrap();

    bed.links
        .remove_link(&ctx, f1.node_ref().id, root.node_ref().id, DeleteMode::Delete)
        .await
        .unwrap();

    // f1 is archived; the shared child kept its outside parent and a primary.
    assert_eq!(lifecycle_of(&bed, f1.node_ref().id).await, Lifecycle::Archived);
    assert_eq!(lifecycle_of(&bed, shared.node_ref().id).await, Lifecycle::Active);
    let parents = bed
        .store
        .find(AssocFilter::parents_of(shared.internal_id()).hard(), Page::all())
        .await
        .unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].parent_id, keep.internal_id());
    assert!(parents[0].primary);
    let paths = bed.store.paths_of(shared.internal_id()).await.unwrap();
    let primary = paths.iter().find(|p| p.primary).unwrap();
    assert_eq!(
        primary.ancestors.ids(),
        &[root.internal_id(), keep.internal_id(), shared.internal_id()]
    );
}
