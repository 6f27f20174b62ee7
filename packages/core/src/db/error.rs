//! Store Error Types
//!
//! Integrity failures raised by store implementations. Missing rows are
//! reported as `Ok(None)` by the find methods, not as errors; these variants
//! cover the cases where stored state itself is wrong.

use thiserror::Error;

/// Store-layer integrity errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row that other state points at is gone.
    #[error("Dangling reference: {context}")]
    DanglingReference { context: String },

    /// Unique constraint violated (duplicate uuid, second tenant root, ...).
    #[error("Uniqueness violated: {context}")]
    Uniqueness { context: String },

    /// Stored state contradicts itself.
    #[error("Integrity violation: {context}")]
    Integrity { context: String },
}

impl StoreError {
    pub fn dangling(context: impl Into<String>) -> Self {
        Self::DanglingReference {
            context: context.into(),
        }
    }

    pub fn uniqueness(context: impl Into<String>) -> Self {
        Self::Uniqueness {
            context: context.into(),
        }
    }

    pub fn integrity(context: impl Into<String>) -> Self {
        Self::Integrity {
            context: context.into(),
        }
    }
}
