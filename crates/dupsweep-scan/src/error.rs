//! Error types for ingestion.

use std::path::PathBuf;

use dupsweep_core::CatalogError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort an ingestion pass.
#[derive(Debug, Error)]
pub enum ScanError {
    /// I/O error on the volume root.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The pass was cancelled. Everything committed so far is consistent.
    #[error("Ingestion interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The catalog refused a record (integrity or invariant failure).
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Error reading a directory entry.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// The content digest could not be computed; nothing was recorded.
    DigestFailed,
    /// A name that is not valid UTF-8.
    InvalidName,
}

/// Non-fatal problem with one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
    pub kind: WarningKind,
}

impl ScanWarning {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_converts() {
        let err: ScanError = CatalogError::invariant("broken").into();
        assert!(err.to_string().contains("broken"));
    }
}
