//! Transaction Context
//!
//! Every mutation in the engine is stamped with a transaction. The transaction
//! itself (begin/commit/rollback against the backing store) is owned by the
//! external persistence layer; this module only models the contract the core
//! consumes:
//!
//! - [`Txn`] - the unit-of-work value threaded through every mutating call
//! - [`TxnJoin`] - join-current vs. force-new nesting disciplines
//! - [`MutationCounter`] - shared affected-entity counter with an optional cap
//! - [`IndexHint`] - post-commit indexing flag recorded per touched node
//! - [`OpContext`] - tenant + actor + transaction, passed explicitly
//!
//! # Context Passing
//!
//! There is deliberately no ambient "current transaction" or "current user"
//! state anywhere in the crate. Callers construct an [`OpContext`] and pass it
//! down; nested operations derive their context with [`OpContext::nested`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a unit of work.
///
/// Minted fresh for every top-level operation and for every `ForceNew` nested
/// scope. Archived closures are tagged with the txn id that archived them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nesting discipline for a transaction scope.
///
/// - `JoinCurrent` nests inside the ambient transaction: one rollback unit.
/// - `ForceNew` starts an independent transaction that commits or fails on
///   its own. Used when a sub-step (e.g. admin-elevated secondary-link replay
///   during restore) must not be rolled back by an unrelated outer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnJoin {
    JoinCurrent,
    ForceNew,
}

/// Raised by [`MutationCounter::bump`] when a caller-specified cap is crossed.
///
/// The enclosing transaction is expected to roll back; the core never retries.
#[derive(Error, Debug, Clone, Copy)]
#[error("operation touched more than {limit} entities")]
pub struct LimitExceeded {
    pub limit: u64,
}

/// Shared counter of entities affected by an operation.
///
/// Threaded through nested calls (both join disciplines share the same
/// counter) purely to report how many entities were touched and to support
/// limit-exceeded aborts. Cloning shares the underlying count.
#[derive(Debug, Clone)]
pub struct MutationCounter {
    count: Arc<AtomicU64>,
    limit: Option<u64>,
}

impl MutationCounter {
    /// Counter with no cap.
    pub fn unlimited() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            limit: None,
        }
    }

    /// Counter that errors once more than `limit` entities are touched.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            limit: Some(limit),
        }
    }

    /// Record one affected entity.
    pub fn bump(&self) -> Result<u64, LimitExceeded> {
        self.bump_by(1)
    }

    /// Record `n` affected entities at once (batch operations).
    pub fn bump_by(&self, n: u64) -> Result<u64, LimitExceeded> {
        let total = self.count.fetch_add(n, Ordering::SeqCst) + n;
        match self.limit {
            Some(limit) if total > limit => Err(LimitExceeded { limit }),
            _ => Ok(total),
        }
    }

    /// Entities affected so far.
    pub fn value(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for MutationCounter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Post-commit indexing flag recorded on a touched node.
///
/// Consumed by the downstream search indexer after the external layer
/// commits; the core only records which nodes changed and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexHint {
    Created,
    Updated,
    Removed,
}

/// The authenticated actor an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Principal name; matches `AccessRule::authority` and node ownership.
    pub name: String,
    /// Group authorities the actor belongs to.
    pub authorities: BTreeSet<String>,
    /// Platform administrator shortcut: full access everywhere.
    pub admin: bool,
}

impl Actor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authorities: BTreeSet::new(),
            admin: false,
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    /// The platform administrator identity, used internally for elevated
    /// sub-steps such as secondary-link replay during restore.
    pub fn system() -> Self {
        Self {
            name: "system".to_string(),
            authorities: BTreeSet::new(),
            admin: true,
        }
    }

    /// All authority strings this actor answers to (own name plus groups).
    pub fn authority_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.authorities.iter().map(|a| a.as_str()))
    }
}

/// A transaction scope: id plus the shared mutation counter.
#[derive(Debug, Clone)]
pub struct Txn {
    pub id: TxnId,
    pub counter: MutationCounter,
}

impl Txn {
    pub fn new() -> Self {
        Self {
            id: TxnId::new(),
            counter: MutationCounter::unlimited(),
        }
    }

    pub fn with_counter(counter: MutationCounter) -> Self {
        Self {
            id: TxnId::new(),
            counter,
        }
    }

    /// Derive a nested scope. `JoinCurrent` keeps the same id (one rollback
    /// unit); `ForceNew` mints a fresh id. The counter is shared either way.
    pub fn nested(&self, join: TxnJoin) -> Self {
        match join {
            TxnJoin::JoinCurrent => self.clone(),
            TxnJoin::ForceNew => Self {
                id: TxnId::new(),
                counter: self.counter.clone(),
            },
        }
    }
}

impl Default for Txn {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context for one operation: tenant, actor, transaction.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub tenant: String,
    pub actor: Actor,
    pub txn: Txn,
}

impl OpContext {
    pub fn new(tenant: impl Into<String>, actor: Actor) -> Self {
        Self {
            tenant: tenant.into(),
            actor,
            txn: Txn::new(),
        }
    }

    pub fn with_txn(tenant: impl Into<String>, actor: Actor, txn: Txn) -> Self {
        Self {
            tenant: tenant.into(),
            actor,
            txn,
        }
    }

    /// Derive a nested context with the given join discipline.
    pub fn nested(&self, join: TxnJoin) -> Self {
        Self {
            tenant: self.tenant.clone(),
            actor: self.actor.clone(),
            txn: self.txn.nested(join),
        }
    }

    /// Derive a nested context running as a different actor (elevated
    /// sub-steps).
    pub fn nested_as(&self, actor: Actor, join: TxnJoin) -> Self {
        Self {
            tenant: self.tenant.clone(),
            actor,
            txn: self.txn.nested(join),
        }
    }
}
