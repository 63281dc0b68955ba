//! Error types for Linkage.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failure class: a caller-correctable validation failure, a missing
//! record (integrity fault), or an opaque storage failure.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Either email or phoneNumber must be provided and not empty")]
    MissingIdentifier,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },
}

/// Top-level error type for Linkage.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        match err {
            // A store refusing an identifier-less record is the same caller
            // mistake the resolver precondition guards against.
            StorageError::InvalidRecord(v) => Self::Validation(v),
            other => Self::Storage(other),
        }
    }
}

impl IdentityError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if a targeted record did not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::ContactNotFound(_)))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the caller may retry the request unchanged.
    ///
    /// The resolver never retries on its own; this only classifies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Storage(e) => matches!(e, StorageError::Io(_)),
        }
    }
}

/// Result type alias for Linkage operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
