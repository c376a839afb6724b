//! Error types for catalog operations.

use std::path::PathBuf;

use compact_str::CompactString;
use thiserror::Error;

use crate::node::{ContentDigest, DiskId, NodeId};

/// Errors raised by the content store and the filesystem tree store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The same digest was observed with two different sizes.
    ///
    /// Either the hash function collided or the data is corrupt; never resolved
    /// automatically.
    #[error("Integrity error: digest {digest} recorded with size {recorded_size}, observed with size {observed_size}")]
    Integrity {
        digest: ContentDigest,
        recorded_size: u64,
        observed_size: u64,
    },

    /// The tree is structurally inconsistent. Always a bug in the engine.
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Disk key not registered in this catalog.
    #[error("Unknown disk: {disk:?}")]
    UnknownDisk { disk: DiskId },

    /// Node key not present in this catalog.
    #[error("Unknown node: {node}")]
    UnknownNode { node: NodeId },

    /// The digest provider failed; nothing was committed for this path.
    #[error("Failed to compute digest for {path}: {source}")]
    DigestFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attempt to delete the synthetic root of a disk.
    #[error("Refusing to delete the root of disk {disk:?}")]
    RootDeletion { disk: DiskId },

    /// Two content types registered under one name.
    #[error("Content type '{name}' registered twice")]
    DuplicateContentType { name: CompactString },

    /// One extension claimed by two content types.
    #[error("Extension '{extension}' claimed by both '{first}' and '{second}'")]
    DuplicateExtension {
        extension: CompactString,
        first: CompactString,
        second: CompactString,
    },
}

impl CatalogError {
    /// Create an invariant violation with a message.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DigestFailed { .. })
    }
}

/// Result alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_message() {
        let err = CatalogError::Integrity {
            digest: ContentDigest::new(vec![0x01, 0x02]),
            recorded_size: 10,
            observed_size: 11,
        };
        let message = err.to_string();
        assert!(message.contains("0102"));
        assert!(message.contains("10"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_digest_failure_is_not_fatal() {
        let err = CatalogError::DigestFailed {
            path: PathBuf::from("a/b.txt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_fatal());
    }
}
