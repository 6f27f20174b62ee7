//! Cairn Core - Node-Graph Persistence and Lifecycle Engine
//!
//! This crate provides the graph-mutation and lifecycle subsystem of the
//! Cairn content platform: folders and documents are nodes of a directed
//! graph connected by typed, named associations, mutated under transactional
//! commit boundaries that also drive downstream search indexing.
//!
//! # Architecture
//!
//! - **Link management**: association create/remove/move/rename with cycle
//!   prevention, primary-path uniqueness and path-string maintenance
//! - **Archival lifecycle**: the transactional move of a node and its hard
//!   closure between the active graph, the archive, and final removal, with
//!   exact restore
//! - **Permissions**: bitmask ACL evaluation plus the propagation that
//!   rewrites inherited-permission path prefixes
//!
//! Persistence, search indexing, content bytes and the HTTP surface live
//! outside this crate, consumed through the contracts in [`db`].
//!
//! # Modules
//!
//! - [`models`] - nodes, associations, paths, security groups
//! - [`txn`] - the transaction-context contract
//! - [`db`] - data-access traits and the embedded in-memory backend
//! - [`services`] - link, archive and permission services

pub mod db;
pub mod models;
pub mod services;
pub mod txn;

// Re-export commonly used types
pub use models::*;
pub use services::*;
pub use txn::{Actor, IndexHint, MutationCounter, OpContext, Txn, TxnId, TxnJoin};
