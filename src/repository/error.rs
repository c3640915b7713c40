//! Errors surfaced by the sales repository.

use crate::storage::StorageError;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors that can occur in repository operations.
///
/// Input errors are detected before any statement reaches storage. Not-found
/// errors are the expected outcome of a conditional write that did not apply.
/// Storage errors carry the failing step and the untouched backend error.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("item does not exist")]
    ItemNotFound,

    #[error("trip does not exist")]
    TripNotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },
}

impl RepositoryError {
    pub(crate) fn storage(operation: &'static str, source: StorageError) -> Self {
        Self::Storage { operation, source }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// True for conditional writes whose target row was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound | Self::TripNotFound)
    }

    /// True for caller mistakes that retrying cannot fix.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidCursor(_) | Self::InvalidArgument(_))
    }
}
