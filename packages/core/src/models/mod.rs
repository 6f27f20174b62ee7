//! Data Models
//!
//! This module contains the core data structures of the graph engine:
//!
//! - `NodeRecord` and its lifecycle variants - the graph vertices
//! - `Association` / `ArchivedAssociation` - typed, named edges
//! - `AncestorChain` / `NodePath` - denormalized ancestor chains
//! - `SecurityGroup` / `AccessRule` / `PermissionMask` - bitmask ACLs
//!
//! Associations are shared references between two node identities; every
//! other piece of data is exclusively owned by its node.

mod association;
mod node;
mod path;
mod security;

pub use association::{
    ArchivedAssociation, Association, DeleteMode, Relationship, RenameMode, ASSOC_TYPE_CONTAINS,
    ASSOC_TYPE_REFERENCES,
};
pub use node::{
    ActiveNode, ArchivedNode, ContentProperty, Lifecycle, NodeCore, NodeInfo, NodeRecord, NodeRef,
    RemovedNode, ValidationError, ASPECT_ARCHIVED, ASPECT_ARCHIVE_ROOT, PROP_EXPIRES_AT, PROP_NAME,
    TYPE_DOCUMENT, TYPE_FOLDER,
};
pub use path::{AncestorChain, NodePath, PathParseError};
pub use security::{AccessRule, MaskParseError, Permission, PermissionMask, SecurityGroup};
