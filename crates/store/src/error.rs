use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with the resource store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row (or a row it references) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A row with the same key already exists.
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// The store refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value failed domain validation when read back.
    #[error("Corrupt stored value: {0}")]
    Corrupt(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn duplicate(kind: &'static str, id: impl ToString) -> Self {
        StoreError::Duplicate {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
