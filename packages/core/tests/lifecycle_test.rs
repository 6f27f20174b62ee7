//! Graph Lifecycle Integration Tests
//!
//! End-to-end coverage over the embedded in-memory backend, driving the
//! public service surface the way an embedding host would:
//!
//! - build a folder tree through path resolution
//! - grant permissions and act as a non-admin user
//! - archive by severing the last hard parent, restore, purge
//! - abort on a caller-specified mutation cap

#[cfg(test)]
mod lifecycle_tests {
    use cairn_core::db::{
        AclStore, ArchiveStore, AssociationStore, FetchOptions, MemoryStore, NodeStore, PathStore,
    };
    use cairn_core::models::{AccessRule, DeleteMode, Lifecycle, NodeInfo, Permission, PermissionMask};
    use cairn_core::services::{
        ArchiveService, CreateNodeRequest, LinkService, LinkServiceConfig, PermissionEvaluator,
        RestoreMode, ServiceError,
    };
    use cairn_core::txn::{Actor, MutationCounter, OpContext, Txn};
    use std::sync::Arc;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_tracing() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
                )
                .with_test_writer()
                .try_init();
        });
    }

    struct TestBed {
        store: Arc<MemoryStore>,
        perms: Arc<PermissionEvaluator>,
        archive: Arc<ArchiveService>,
        links: Arc<LinkService>,
    }

    fn services() -> TestBed {
        init_tracing();
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

    #[tokio::test]
    async fn full_lifecycle_walk() {
        let bed = services();
        let admin = OpContext::new("acme", Actor::system());

        // Build /finance/reports through path resolution.
        let reports = bed
            .links
            .resolve_path(&admin, "/finance/reports", true)
            .await
            .unwrap();
        let q1 = bed
            .links
            .create_node(&admin, reports.node_ref().id, CreateNodeRequest::document("q1.pdf"))
            .await
            .unwrap();

        // carol gets full working rights below /finance, plus a direct Read
        // rule on the reports folder itself so the archived side still
        // resolves her (inherited rules do not reach archived nodes).
        let finance = bed.links.resolve_path(&admin, "/finance", false).await.unwrap();
        bed.perms
            .add_rule(
                &admin,
                finance.node_ref().id,
                AccessRule::new(
                    "carol",
                    PermissionMask::of(&[
                        Permission::Read,
                        Permission::Write,
                        Permission::CreateChild,
                        Permission::Delete,
                    ]),
                ),
            )
            .await
            .unwrap();
        bed.perms
            .add_rule(
                &admin,
                reports.node_ref().id,
                AccessRule::new("carol", Permission::Read.into()),
            )
            .await
            .unwrap();

        // carol archives the reports folder by severing its only hard parent.
        let carol = OpContext::new("acme", Actor::named("carol"));
        bed.links
            .remove_link(
                &carol,
                reports.node_ref().id,
                finance.node_ref().id,
                DeleteMode::Delete,
            )
            .await
            .unwrap();

        let archived = bed
            .store
            .find_by_uuid("acme", q1.node_ref().id, FetchOptions::DEFAULT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(archived.lifecycle(), Lifecycle::Archived);

        // carol restores it; the document comes back under /finance/reports.
        bed.archive
            .restore_node(&carol, reports.node_ref().id, None, RestoreMode::All)
            .await
            .unwrap();
        let back = bed
            .links
            .resolve_path(&admin, "/finance/reports", false)
            .await
            .unwrap();
        assert_eq!(back.node_ref(), reports.node_ref());

        // Archive again and purge for good.
        bed.links
            .remove_link(
                &admin,
                reports.node_ref().id,
                finance.node_ref().id,
                DeleteMode::Delete,
            )
            .await
            .unwrap();
        let purged = bed
            .archive
            .purge_node(&admin, reports.node_ref().id, true)
            .await
            .unwrap();
        assert_eq!(purged, 2);
        let gone = bed
            .store
            .find_by_uuid("acme", q1.node_ref().id, FetchOptions::DEFAULT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gone.lifecycle(), Lifecycle::Removed);
    }

    #[tokio::test]
    async fn mutation_cap_aborts_with_limit_exceeded() {
        let bed = services();
        let admin = OpContext::new("acme", Actor::system());
        bed.links.resolve_path(&admin, "/a/b/c/d", true).await.unwrap();

        // A capped transaction cannot archive the whole chain.
        let capped = OpContext::with_txn(
            "acme",
            Actor::system(),
            Txn::with_counter(MutationCounter::with_limit(2)),
        );
        let a = bed.links.resolve_path(&admin, "/a", false).await.unwrap();
        let root = bed.links.ensure_root(&admin).await.unwrap();
        let err = bed
            .links
            .remove_link(
                &capped,
                a.node_ref().id,
                root.node_ref().id,
                DeleteMode::Delete,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LimitExceeded { limit: 2 }), "{err:?}");
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let bed = services();
        let acme = OpContext::new("acme", Actor::system());
        let globex = OpContext::new("globex", Actor::system());

        let acme_docs = bed.links.resolve_path(&acme, "/docs", true).await.unwrap();
        bed.links.resolve_path(&globex, "/docs", true).await.unwrap();

        // The acme node is invisible under the globex tenant.
        let missing = bed
            .store
            .find_by_uuid("globex", acme_docs.node_ref().id, FetchOptions::DEFAULT)
            .await
            .unwrap();
        assert!(missing.is_none());

        // Each tenant has its own root.
        let acme_root = bed.links.ensure_root(&acme).await.unwrap();
        let globex_root = bed.links.ensure_root(&globex).await.unwrap();
        assert_ne!(acme_root.internal_id(), globex_root.internal_id());
    }
}
