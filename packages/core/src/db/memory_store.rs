//! MemoryStore - Embedded In-Memory Backend
//!
//! One struct implements all five store contracts over `RwLock`-guarded
//! tables. This is the reference backend the test suite runs against and a
//! usable embedded backend for single-process deployments; a relational
//! implementation lives outside the core and is substituted through the same
//! traits.
//!
//! # Consistency Notes
//!
//! - The canonical node record never carries materialized relations; finds
//!   attach them per `FetchOptions` from the association and path tables.
//! - Association enumeration order is insertion order; `RenameMode::First`
//!   and restore's "first recorded parent" both lean on it.
//! - Tenant-root creation takes the registry mutex before touching tables so
//!   two racing callers cannot both create a root.

use crate::db::{
    AclStore, ArchiveStore, AssocFilter, AssociationStore, FetchOptions, NodeStore, Page,
    PathStore, StoreError,
};
use crate::models::{
    AccessRule, ActiveNode, AncestorChain, ArchivedAssociation, ArchivedNode, Association,
    NodeInfo, NodePath, NodeRecord, SecurityGroup,
};
use crate::txn::{IndexHint, TxnId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    nodes: HashMap<i64, NodeRecord>,
    uuid_index: HashMap<(String, Uuid), i64>,
    assocs: Vec<Association>,
    paths: HashMap<i64, Vec<NodePath>>,
    /// Capture-ordered archive bookkeeping rows, tagged by archive txn.
    archive_rows: Vec<(TxnId, ArchivedAssociation)>,
    groups: HashMap<Uuid, SecurityGroup>,
    roots: HashMap<String, i64>,
    /// Latest commit stamp per node.
    txn_marks: HashMap<i64, (TxnId, IndexHint)>,
    /// Nodes whose path rows were rewritten under a txn, awaiting the
    /// propagation pass.
    dirty_paths: HashMap<TxnId, BTreeSet<i64>>,
    next_internal: i64,
}

/// Embedded in-memory implementation of all five store contracts.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Advisory lock for tenant-root creation.
    registry: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_internal: 1,
                ..Tables::default()
            }),
            registry: Mutex::new(()),
        }
    }

    /// Latest commit stamp recorded for a node, for observability and tests.
    pub async fn transaction_mark(&self, internal_id: i64) -> Option<(TxnId, IndexHint)> {
        self.tables.read().await.txn_marks.get(&internal_id).copied()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    fn materialize(&self, record: NodeRecord, opts: FetchOptions) -> NodeRecord {
        let mut node = match record {
            NodeRecord::Active(node) => node,
            other => return other,
        };
        let id = node.core.internal_id;
        if opts.parent_assocs {
            node.parent_assocs = self
                .assocs
                .iter()
                .filter(|a| a.child_id == id)
                .filter(|a| !opts.primary_hard_only || (a.hard && a.primary))
                .cloned()
                .collect();
        }
        if opts.child_assocs {
            node.child_assocs = self
                .assocs
                .iter()
                .filter(|a| a.parent_id == id)
                .cloned()
                .collect();
        }
        if opts.paths {
            node.paths = self.paths.get(&id).cloned().unwrap_or_default();
        }
        NodeRecord::Active(node)
    }

    fn active_exists(&self, id: i64) -> bool {
        matches!(self.nodes.get(&id), Some(NodeRecord::Active(_)))
    }

    fn mark_dirty(&mut self, txn: TxnId, node_id: i64) {
        self.dirty_paths.entry(txn).or_default().insert(node_id);
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn find_by_uuid(
        &self,
        tenant: &str,
        uuid: Uuid,
        opts: FetchOptions,
    ) -> Result<Option<NodeRecord>> {
        let tables = self.tables.read().await;
        let Some(&id) = tables.uuid_index.get(&(tenant.to_string(), uuid)) else {
            return Ok(None);
        };
        Ok(tables
            .nodes
            .get(&id)
            .cloned()
            .map(|r| tables.materialize(r, opts)))
    }

    async fn find_by_internal_id(&self, id: i64, opts: FetchOptions) -> Result<Option<NodeRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .get(&id)
            .cloned()
            .map(|r| tables.materialize(r, opts)))
    }

    async fn map_by_uuids(
        &self,
        tenant: &str,
        uuids: &[Uuid],
    ) -> Result<HashMap<Uuid, NodeRecord>> {
        let tables = self.tables.read().await;
        let mut map = HashMap::new();
        for &uuid in uuids {
            if let Some(&id) = tables.uuid_index.get(&(tenant.to_string(), uuid)) {
                if let Some(record) = tables.nodes.get(&id) {
                    map.insert(uuid, tables.materialize(record.clone(), FetchOptions::DEFAULT));
                }
            }
        }
        Ok(map)
    }

    async fn create(&self, mut node: ActiveNode) -> Result<ActiveNode> {
        let mut tables = self.tables.write().await;
        let key = (node.core.node_ref.tenant.clone(), node.core.node_ref.id);
        if tables.uuid_index.contains_key(&key) {
            return Err(StoreError::uniqueness(format!(
                "node {} already exists",
                node.core.node_ref
            ))
            .into());
        }
        node.core.internal_id = tables.next_internal;
        tables.next_internal += 1;
        let id = node.core.internal_id;
        tables.uuid_index.insert(key, id);
        tables.paths.insert(id, Vec::new());

        let mut stored = node.clone();
        stored.parent_assocs.clear();
        stored.child_assocs.clear();
        stored.paths.clear();
        tables.nodes.insert(id, NodeRecord::Active(stored));
        Ok(node)
    }

    async fn update(&self, node: ActiveNode) -> Result<ActiveNode> {
        let mut tables = self.tables.write().await;
        let id = node.core.internal_id;
        if !tables.active_exists(id) {
            return Err(StoreError::dangling(format!(
                "update of missing active node {}",
                node.core.node_ref
            ))
            .into());
        }
        let mut stored = node.clone();
        stored.parent_assocs.clear();
        stored.child_assocs.clear();
        stored.paths.clear();
        tables.nodes.insert(id, NodeRecord::Active(stored));
        Ok(node)
    }

    async fn swap_lifecycle(&self, record: NodeRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        let id = record.internal_id();
        if !tables.nodes.contains_key(&id) {
            return Err(StoreError::dangling(format!(
                "lifecycle swap of missing node {}",
                record.node_ref()
            ))
            .into());
        }
        tables.nodes.insert(id, record);
        Ok(())
    }

    async fn set_transaction(&self, internal_id: i64, txn: TxnId, hint: IndexHint) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(record) = tables.nodes.get_mut(&internal_id) {
            match record {
                NodeRecord::Active(n) => n.core.txn_id = txn,
                NodeRecord::Archived(n) => n.core.txn_id = txn,
                NodeRecord::Removed(n) => n.core.txn_id = txn,
            }
        }
        tables.txn_marks.insert(internal_id, (txn, hint));
        Ok(())
    }

    async fn find_root(&self, tenant: &str) -> Result<Option<ActiveNode>> {
        let tables = self.tables.read().await;
        let Some(&id) = tables.roots.get(tenant) else {
            return Ok(None);
        };
        let record = tables
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::dangling(format!("root of tenant '{}' is gone", tenant)))?;
        Ok(tables.materialize(record, FetchOptions::FULL).into_active())
    }

    async fn create_root(&self, node: ActiveNode) -> Result<ActiveNode> {
        let _registry = self.registry.lock().await;
        {
            let tables = self.tables.read().await;
            if tables.roots.contains_key(&node.core.node_ref.tenant) {
                return Err(StoreError::uniqueness(format!(
                    "tenant '{}' already has a root",
                    node.core.node_ref.tenant
                ))
                .into());
            }
        }
        let tenant = node.core.node_ref.tenant.clone();
        let created = NodeStore::create(self, node).await?;
        self.tables
            .write()
            .await
            .roots
            .insert(tenant, created.core.internal_id);
        Ok(created)
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn find(&self, filter: AssocFilter, page: Page) -> Result<Vec<Association>> {
        let tables = self.tables.read().await;
        let iter = tables
            .assocs
            .iter()
            .filter(|a| filter.matches(a))
            .skip(page.offset);
        let out = match page.limit {
            Some(limit) => iter.take(limit).cloned().collect(),
            None => iter.cloned().collect(),
        };
        Ok(out)
    }

    async fn get(&self, assoc_id: Uuid) -> Result<Option<Association>> {
        let tables = self.tables.read().await;
        Ok(tables.assocs.iter().find(|a| a.id == assoc_id).cloned())
    }

    async fn create(&self, assoc: Association) -> Result<Association> {
        let mut tables = self.tables.write().await;
        for end in [assoc.parent_id, assoc.child_id] {
            if !tables.active_exists(end) {
                return Err(StoreError::dangling(format!(
                    "association endpoint {} is not an active node",
                    end
                ))
                .into());
            }
        }
        tables.assocs.push(assoc.clone());
        Ok(assoc)
    }

    async fn rename(&self, assoc_id: Uuid, name: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let assoc = tables
            .assocs
            .iter_mut()
            .find(|a| a.id == assoc_id)
            .ok_or_else(|| StoreError::dangling(format!("association {} is gone", assoc_id)))?;
        assoc.name = Some(name.to_string());
        Ok(())
    }

    async fn set_primary(&self, assoc_id: Uuid, primary: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let assoc = tables
            .assocs
            .iter_mut()
            .find(|a| a.id == assoc_id)
            .ok_or_else(|| StoreError::dangling(format!("association {} is gone", assoc_id)))?;
        assoc.primary = primary;
        Ok(())
    }

    async fn delete(&self, assoc_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.assocs.len();
        tables.assocs.retain(|a| a.id != assoc_id);
        if tables.assocs.len() == before {
            return Err(StoreError::dangling(format!("association {} is gone", assoc_id)).into());
        }
        Ok(())
    }

    async fn delete_for_node(&self, internal_id: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.assocs.len();
        tables
            .assocs
            .retain(|a| a.parent_id != internal_id && a.child_id != internal_id);
        Ok((before - tables.assocs.len()) as u64)
    }

    async fn copy_children(&self, from_parent: i64, to_parent: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let copies: Vec<Association> = tables
            .assocs
            .iter()
            .filter(|a| a.parent_id == from_parent)
            .map(|a| {
                let mut copy = a.clone();
                copy.id = Uuid::new_v4();
                copy.parent_id = to_parent;
                copy
            })
            .collect();
        let count = copies.len() as u64;
        tables.assocs.extend(copies);
        Ok(count)
    }

    async fn paths_of(&self, internal_id: i64) -> Result<Vec<NodePath>> {
        let tables = self.tables.read().await;
        Ok(tables.paths.get(&internal_id).cloned().unwrap_or_default())
    }

    async fn replace_paths(&self, internal_id: i64, paths: Vec<NodePath>) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.paths.insert(internal_id, paths);
        Ok(())
    }

    async fn replace_ancestor_prefixes(
        &self,
        txn: TxnId,
        old_prefix: &AncestorChain,
        new_prefix: &AncestorChain,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut rewritten = 0u64;
        let mut touched = Vec::new();
        for (&node_id, paths) in tables.paths.iter_mut() {
            for path in paths.iter_mut() {
                if let Some(chain) = path.ancestors.replace_prefix(old_prefix, new_prefix) {
                    path.level = chain.len().saturating_sub(1) as u32;
                    path.ancestors = chain;
                    rewritten += 1;
                    touched.push(node_id);
                }
            }
        }
        for node_id in touched {
            tables.mark_dirty(txn, node_id);
        }
        Ok(rewritten)
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn get_node(&self, tenant: &str, uuid: Uuid) -> Result<Option<ArchivedNode>> {
        let tables = self.tables.read().await;
        let Some(&id) = tables.uuid_index.get(&(tenant.to_string(), uuid)) else {
            return Ok(None);
        };
        Ok(tables.nodes.get(&id).and_then(|r| r.as_archived().cloned()))
    }

    async fn get_node_by_id(&self, internal_id: i64) -> Result<Option<ArchivedNode>> {
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .get(&internal_id)
            .and_then(|r| r.as_archived().cloned()))
    }

    async fn record(&self, archive_txn: TxnId, assoc: ArchivedAssociation) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.archive_rows.push((archive_txn, assoc));
        Ok(())
    }

    async fn find_parent_associations(
        &self,
        child_internal_id: i64,
        hard_only: bool,
    ) -> Result<Vec<ArchivedAssociation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .archive_rows
            .iter()
            .map(|(_, a)| a)
            .filter(|a| a.child_id == child_internal_id && (!hard_only || a.hard))
            .cloned()
            .collect())
    }

    async fn closure_members(&self, archive_txn: TxnId) -> Result<Vec<i64>> {
        let tables = self.tables.read().await;
        let mut members: Vec<i64> = tables
            .nodes
            .iter()
            .filter_map(|(&id, record)| match record {
                NodeRecord::Archived(n) if n.archive_txn == archive_txn => Some(id),
                _ => None,
            })
            .collect();
        members.sort_unstable();
        Ok(members)
    }

    async fn outgoing_soft_associations(
        &self,
        archive_txn: TxnId,
    ) -> Result<Vec<ArchivedAssociation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .archive_rows
            .iter()
            .filter(|(txn, a)| *txn == archive_txn && !a.hard)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn restore_transaction(&self, archive_txn: TxnId, new_txn: TxnId) -> Result<Vec<i64>> {
        let mut tables = self.tables.write().await;
        for (txn, _) in tables.archive_rows.iter_mut() {
            if *txn == archive_txn {
                *txn = new_txn;
            }
        }
        let mut members = Vec::new();
        for (&id, record) in tables.nodes.iter_mut() {
            if let NodeRecord::Archived(n) = record {
                if n.archive_txn == archive_txn {
                    n.archive_txn = new_txn;
                    members.push(id);
                }
            }
        }
        members.sort_unstable();
        Ok(members)
    }

    async fn delete_closure(&self, archive_txn: TxnId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.archive_rows.len();
        tables.archive_rows.retain(|(txn, _)| *txn != archive_txn);
        Ok((before - tables.archive_rows.len()) as u64)
    }

    async fn delete_for_node(&self, internal_id: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.archive_rows.len();
        tables
            .archive_rows
            .retain(|(_, a)| a.child_id != internal_id && a.parent_id != internal_id);
        Ok((before - tables.archive_rows.len()) as u64)
    }
}

#[async_trait]
impl AclStore for MemoryStore {
    async fn group(&self, tenant: &str, id: Uuid) -> Result<Option<SecurityGroup>> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .get(&id)
            .filter(|g| g.tenant == tenant)
            .cloned())
    }

    async fn group_of_node(&self, internal_id: i64) -> Result<Option<SecurityGroup>> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .find(|g| g.managed && g.node_internal_id == Some(internal_id))
            .cloned())
    }

    async fn create_group(&self, group: SecurityGroup) -> Result<SecurityGroup> {
        let mut tables = self.tables.write().await;
        if tables.groups.contains_key(&group.id) {
            return Err(
                StoreError::uniqueness(format!("security group {} already exists", group.id))
                    .into(),
            );
        }
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn add_rule(&self, group_id: Uuid, rule: AccessRule) -> Result<()> {
        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::dangling(format!("security group {} is gone", group_id)))?;
        group.rules.retain(|r| r.authority != rule.authority);
        group.rules.push(rule);
        Ok(())
    }

    async fn remove_rule(&self, group_id: Uuid, authority: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::dangling(format!("security group {} is gone", group_id)))?;
        group.rules.retain(|r| r.authority != authority);
        Ok(())
    }

    async fn set_inheritance(&self, group_id: Uuid, inherits: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::dangling(format!("security group {} is gone", group_id)))?;
        group.inherits = inherits;
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.groups.remove(&group_id);
        Ok(())
    }

    async fn replace_sg_paths(
        &self,
        txn: TxnId,
        old_prefix: &AncestorChain,
        new_prefix: &AncestorChain,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut rewritten = 0u64;
        let mut touched = Vec::new();
        for (&node_id, paths) in tables.paths.iter_mut() {
            for path in paths.iter_mut() {
                if let Some(chain) = path.sg_chain.replace_prefix(old_prefix, new_prefix) {
                    path.sg_chain = chain;
                    rewritten += 1;
                    touched.push(node_id);
                }
            }
        }
        for node_id in touched {
            tables.mark_dirty(txn, node_id);
        }
        Ok(rewritten)
    }
}

#[async_trait]
impl PathStore for MemoryStore {
    async fn find_longest_path_node(
        &self,
        tenant: &str,
        segments: &[String],
    ) -> Result<Option<(i64, usize)>> {
        let tables = self.tables.read().await;
        let Some(&root) = tables.roots.get(tenant) else {
            return Ok(None);
        };
        let mut current = root;
        let mut matched = 0;
        for segment in segments {
            let next = tables.assocs.iter().find(|a| {
                a.hard && a.parent_id == current && a.name.as_deref() == Some(segment.as_str())
            });
            match next {
                Some(assoc) => {
                    current = assoc.child_id;
                    matched += 1;
                }
                None => break,
            }
        }
        Ok(Some((current, matched)))
    }

    async fn propagate_paths_transaction(&self, txn: TxnId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(dirty) = tables.dirty_paths.remove(&txn) else {
            return Ok(0);
        };
        let count = dirty.len() as u64;
        for node_id in dirty {
            if let Some(record) = tables.nodes.get_mut(&node_id) {
                match record {
                    NodeRecord::Active(n) => n.core.txn_id = txn,
                    NodeRecord::Archived(n) => n.core.txn_id = txn,
                    NodeRecord::Removed(n) => n.core.txn_id = txn,
                }
            }
            tables.txn_marks.insert(node_id, (txn, IndexHint::Updated));
        }
        Ok(count)
    }
}
