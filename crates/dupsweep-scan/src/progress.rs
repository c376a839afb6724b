//! Ingestion progress reporting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Progress information during an ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestProgress {
    /// Entries the walk produced so far.
    pub entries_seen: u64,
    /// Files whose digest was computed.
    pub files_hashed: u64,
    /// Files served from the digest cache.
    pub files_cached: u64,
    /// Bytes read for hashing.
    pub bytes_hashed: u64,
    /// Non-fatal problems so far.
    pub warnings: u64,
    /// Most recently committed path.
    pub current_path: PathBuf,
    pub elapsed: Duration,
}

impl IngestProgress {
    /// Hashing throughput in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.bytes_hashed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Files committed so far, hashed or cached.
    pub fn files_committed(&self) -> u64 {
        self.files_hashed + self.files_cached
    }
}

/// Running counters owned by the writer.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Instant,
    current: IngestProgress,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            current: IngestProgress::default(),
        }
    }

    pub fn record_entries(&mut self, count: u64) {
        self.current.entries_seen += count;
    }

    pub fn record_hashed(&mut self, size: u64) {
        self.current.files_hashed += 1;
        self.current.bytes_hashed += size;
    }

    pub fn record_cached(&mut self) {
        self.current.files_cached += 1;
    }

    pub fn record_warning(&mut self) {
        self.current.warnings += 1;
    }

    pub fn set_current_path(&mut self, path: PathBuf) {
        self.current.current_path = path;
    }

    pub fn snapshot(&self) -> IngestProgress {
        IngestProgress {
            elapsed: self.start_time.elapsed(),
            ..self.current.clone()
        }
    }
}
