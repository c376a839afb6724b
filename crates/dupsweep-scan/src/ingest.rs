//! Ingestion pipeline: walk, hash, commit.
//!
//! The calling thread is the only writer. Directories and files with a
//! reusable cached digest are committed straight from the walk; the rest are
//! hashed on a rayon pool and handed back through a bounded queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dupsweep_core::{Catalog, CatalogError, DeleteSummary, DiskId};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{ScanError, ScanWarning, WarningKind};
use crate::hasher::{Blake3Provider, DigestProvider};
use crate::progress::{IngestProgress, ProgressTracker};
use crate::walker::{self, WalkEntry};

/// Send a progress update every this many digest results.
const PROGRESS_INTERVAL: u64 = 256;

/// Summary of one ingestion pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub directories: u64,
    pub files: u64,
    /// Files whose digest was computed.
    pub hashed: u64,
    /// Files served from the digest cache.
    pub cached: u64,
    pub bytes_hashed: u64,
    /// Entries that vanished from the volume since the last pass.
    pub pruned: DeleteSummary,
    pub warnings: Vec<ScanWarning>,
    pub duration: Duration,
}

struct Hashed {
    index: usize,
    result: std::io::Result<dupsweep_core::ContentDigest>,
}

/// Feeds one volume into a catalog.
pub struct Ingestor {
    provider: Arc<dyn DigestProvider>,
    progress_tx: broadcast::Sender<IngestProgress>,
    cancel: CancellationToken,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestor {
    /// Create an ingestor hashing with BLAKE3.
    pub fn new() -> Self {
        Self::with_provider(Arc::new(Blake3Provider))
    }

    /// Create an ingestor with a custom digest provider.
    pub fn with_provider(provider: Arc<dyn DigestProvider>) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            provider,
            progress_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestProgress> {
        self.progress_tx.subscribe()
    }

    /// Token that aborts the current pass when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Walk `config.root` and record it as `disk`.
    ///
    /// A cancelled pass returns [`ScanError::Interrupted`]; what was
    /// committed before stays and is consistent, but nothing is pruned.
    pub fn ingest(
        &self,
        catalog: &mut Catalog,
        disk: DiskId,
        config: &IngestConfig,
    ) -> Result<IngestReport, ScanError> {
        let start = Instant::now();
        if catalog.disk(disk).is_none() {
            return Err(CatalogError::UnknownDisk { disk }.into());
        }

        let walk = walker::walk(config, &self.cancel)?;
        let mut tracker = ProgressTracker::new();
        tracker.record_entries(walk.entries.len() as u64);
        let mut report = IngestReport::default();
        for warning in walk.warnings {
            warn!(path = %warning.path.display(), message = %warning.message, "skipped entry");
            tracker.record_warning();
            report.warnings.push(warning);
        }

        let mut pending: Vec<&WalkEntry> = Vec::new();
        for entry in &walk.entries {
            if entry.is_dir {
                catalog.ensure_directory(disk, &entry.segments)?;
                report.directories += 1;
                continue;
            }
            report.files += 1;
            if catalog
                .cached_digest(disk, &entry.segments, entry.size, entry.modified)
                .is_some()
            {
                catalog.record_file(disk, &entry.segments, entry.size, entry.modified, || {
                    Err(std::io::Error::other("cached digest vanished"))
                })?;
                tracker.record_cached();
                report.cached += 1;
            } else {
                pending.push(entry);
            }
        }
        debug!(cached = report.cached, pending = pending.len(), "digest cache consulted");

        self.hash_and_commit(catalog, disk, config, &pending, &mut tracker, &mut report)?;

        let _ = self.progress_tx.send(tracker.snapshot());
        if self.cancel.is_cancelled() || !walk.complete {
            info!(hashed = report.hashed, "ingestion interrupted");
            return Err(ScanError::Interrupted);
        }

        if config.prune_missing {
            let mut listings: Vec<_> = walk.listings.iter().collect();
            listings.sort_by(|a, b| a.0.cmp(b.0));
            for (segments, names) in listings {
                let Some(dir) = catalog.lookup(disk, segments) else {
                    continue;
                };
                if catalog.node(dir).is_some_and(|n| n.is_dir()) {
                    report.pruned.merge(catalog.retain_children(dir, names)?);
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            files = report.files,
            hashed = report.hashed,
            cached = report.cached,
            pruned = report.pruned.nodes_removed,
            warnings = report.warnings.len(),
            provider = self.provider.name(),
            "ingestion complete"
        );
        Ok(report)
    }

    fn hash_and_commit(
        &self,
        catalog: &mut Catalog,
        disk: DiskId,
        config: &IngestConfig,
        pending: &[&WalkEntry],
        tracker: &mut ProgressTracker,
        report: &mut IngestReport,
    ) -> Result<(), ScanError> {
        if pending.is_empty() {
            return Ok(());
        }

        let pool = match config.threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ScanError::InvalidConfig {
                        message: e.to_string(),
                    })?,
            ),
        };

        let (tx, rx) = mpsc::channel::<Hashed>(config.queue_capacity);
        let stop = self.cancel.child_token();
        let provider: &dyn DigestProvider = self.provider.as_ref();

        std::thread::scope(|scope| {
            let workers_stop = stop.clone();
            scope.spawn(move || {
                let work = move || {
                    pending
                        .par_iter()
                        .enumerate()
                        .for_each_with(tx, |tx, (index, entry)| {
                            if workers_stop.is_cancelled() {
                                return;
                            }
                            let result = provider.digest_file(&entry.path);
                            if tx.blocking_send(Hashed { index, result }).is_err() {
                                workers_stop.cancel();
                            }
                        });
                };
                match pool {
                    Some(pool) => pool.install(work),
                    None => work(),
                }
            });

            // Dropped before the scope joins, which unblocks the workers.
            let mut rx = rx;
            let mut received: u64 = 0;
            while let Some(hashed) = rx.blocking_recv() {
                received += 1;
                let entry = pending[hashed.index];
                let outcome = catalog.record_file(
                    disk,
                    &entry.segments,
                    entry.size,
                    entry.modified,
                    move || hashed.result,
                );
                match outcome {
                    Ok(_) => {
                        tracker.record_hashed(entry.size);
                        report.hashed += 1;
                        report.bytes_hashed += entry.size;
                    }
                    Err(err) if !err.is_fatal() => {
                        warn!(path = %entry.path.display(), error = %err, "digest failed");
                        tracker.record_warning();
                        report.warnings.push(ScanWarning::new(
                            &entry.path,
                            err.to_string(),
                            WarningKind::DigestFailed,
                        ));
                    }
                    Err(err) => {
                        stop.cancel();
                        return Err(ScanError::from(err));
                    }
                }

                tracker.set_current_path(entry.path.clone());
                if received % PROGRESS_INTERVAL == 0 {
                    let _ = self.progress_tx.send(tracker.snapshot());
                }
            }
            Ok(())
        })
    }
}
