//! Error types for catalog persistence.

use dupsweep_core::CatalogError;
use thiserror::Error;

/// Errors raised while saving or loading a catalog.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The loaded rows do not form a valid catalog.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A stored value cannot be represented in memory.
    #[error("Corrupt database: {message}")]
    Corrupt { message: String },
}

impl DbError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Result alias for persistence operations.
pub type DbResult<T> = Result<T, DbError>;
