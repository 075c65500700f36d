//! Error types for tally storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (account, grant, job, ...).
        entity: &'static str,
        /// The missing key.
        id: String,
    },
}

impl From<StoreError> for tally_core::LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "account", id } => {
                Self::AccountNotFound { account_id: id }
            }
            StoreError::NotFound { entity: "grant", id } => Self::GrantNotFound { grant_id: id },
            other => Self::Storage(other.to_string()),
        }
    }
}
