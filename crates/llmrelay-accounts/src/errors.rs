//! Account-store error type.

use llmrelay_core::errors::{PersistenceError, PersistenceOperation, ProxyError};

/// Errors raised by the account store, distributor, and token manager.
#[derive(Debug, thiserror::Error)]
pub enum AccountStoreError {
    /// The underlying `SQLite` connection or query failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// `other_json` did not round-trip through serde.
    #[error("invalid account metadata: {0}")]
    Json(#[from] serde_json::Error),

    /// No account with the given id exists.
    #[error("account not found: {0}")]
    NotFound(String),

    /// The requested kind had no account satisfying the distributor's
    /// selection criteria.
    #[error("no account available for kind {0}")]
    NoAccountAvailable(String),
}

impl From<AccountStoreError> for ProxyError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NoAccountAvailable(channel) => {
                Self::NoAccountAvailable { channel }
            }
            other => Self::Persistence(
                PersistenceError::new("accounts", PersistenceOperation::Query, other.to_string())
                    .with_source(other),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
