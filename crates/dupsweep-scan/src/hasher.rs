//! Injectable content digest providers.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use blake3::Hasher;
use dupsweep_core::ContentDigest;

/// Computes the content digest of a file.
///
/// Implementations must be pure functions of the file bytes.
pub trait DigestProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Digest the file at `path`.
    fn digest_file(&self, path: &Path) -> std::io::Result<ContentDigest>;
}

/// Files above this size are memory-mapped.
const MMAP_THRESHOLD: u64 = 128 * 1024;

/// BLAKE3, 256-bit digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Provider;

impl DigestProvider for Blake3Provider {
    fn name(&self) -> &'static str {
        "blake3"
    }

    fn digest_file(&self, path: &Path) -> std::io::Result<ContentDigest> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let mut hasher = Hasher::new();

        if size > MMAP_THRESHOLD {
            hasher.update_mmap(path)?;
        } else {
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
        }

        Ok(ContentDigest::new(hasher.finalize().as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_blake3_matches_reference() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let digest = Blake3Provider.digest_file(file.path()).unwrap();
        assert_eq!(digest.as_bytes(), blake3::hash(b"hello world").as_bytes());
    }

    #[test]
    fn test_large_file_uses_same_digest() {
        let data = vec![7u8; (MMAP_THRESHOLD as usize) * 2];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        let digest = Blake3Provider.digest_file(file.path()).unwrap();
        assert_eq!(digest.as_bytes(), blake3::hash(&data).as_bytes());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Blake3Provider.digest_file(Path::new("/nonexistent/file")).is_err());
    }
}
