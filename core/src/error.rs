use thiserror::Error;

use crate::remote::Table;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The remote store is not configured (missing URL or credentials).
    #[error("remote store not configured: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote rejected {table} operation: {message}")]
    Remote { table: Table, message: String },

    /// The mutation target no longer exists (locally or remotely).
    #[error("{table} row {id} not found")]
    NotFound { table: Table, id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("malformed change event on {table}: {reason}")]
    MalformedEvent { table: Table, reason: String },

    /// No session is live, or it ended while the operation was in flight.
    #[error("no active session")]
    SessionEnded,
}

impl SyncError {
    pub fn remote(table: Table, message: impl Into<String>) -> Self {
        Self::Remote {
            table,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Network failures may succeed on retry; everything else will not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

