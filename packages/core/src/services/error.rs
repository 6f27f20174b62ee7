//! Service Layer Error Types
//!
//! The engine's error taxonomy. Every variant carries enough context (node
//! or association identifiers) for a caller to report the precise target of
//! the failure.
//!
//! Validation and permission failures are raised immediately and abort the
//! enclosing transaction; the only tolerated failure site is secondary-link
//! replay during restore, which logs and continues. Nothing here retries.

use crate::models::ValidationError;
use crate::txn::LimitExceeded;
use thiserror::Error;

/// Service operation errors.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Missing node, path, association or version.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Permission or ownership failure.
    #[error("Access denied: {required} on {node}")]
    Forbidden { node: String, required: String },

    /// Malformed or contradictory input; includes cycle creation and
    /// ambiguous relationships.
    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    /// State does not allow the operation (not archived, not restorable,
    /// unexpected node kind).
    #[error("Precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    /// Contradictory stored state, e.g. a node both active and archived.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    /// Operation touched more entities than the caller-specified cap.
    #[error("Operation limit exceeded: cap of {limit} entities crossed")]
    LimitExceeded { limit: u64 },

    /// Underlying persistence failure; not expected to be handled locally.
    #[error("Storage failure: {0}")]
    SystemFailure(#[from] anyhow::Error),
}

impl ServiceError {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a forbidden error naming the node and the missing permission.
    pub fn forbidden(node: impl Into<String>, required: impl Into<String>) -> Self {
        Self::Forbidden {
            node: node.into(),
            required: required.into(),
        }
    }

    /// Create a bad-request error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// Create a precondition-failed error.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }
}

impl From<LimitExceeded> for ServiceError {
    fn from(err: LimitExceeded) -> Self {
        Self::LimitExceeded { limit: err.limit }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest {
            reason: err.to_string(),
        }
    }
}

/// Shorthand result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
