//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::notification::Notification;

/// Top-level domain error type.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// An entity or aggregate was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that was looked up.
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Entity validation failed.
    #[error("entity validation error: {0}")]
    Validation(Notification),

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// `commit` or `rollback` was called without an active transaction.
    #[error("no active transaction")]
    NoActiveTransaction,
}

impl DomainError {
    /// Shorthand for a [`DomainError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a single-field [`DomainError::Validation`].
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(Notification::single(field, message))
    }

    /// Returns `true` for failures that may succeed when attempted again.
    ///
    /// Validation and not-found errors are deterministic; programmer errors
    /// must crash rather than loop.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::Infrastructure(_)
        )
    }

    /// Returns `true` for misuse of the transactional API.
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::NoActiveTransaction)
    }
}
