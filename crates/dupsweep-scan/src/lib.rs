//! Volume ingestion for dupsweep.
//!
//! Walks a mounted volume with jwalk, hashes new or changed files on a rayon
//! pool and commits everything into a [`dupsweep_core::Catalog`] from the
//! calling thread. Digests cached in the catalog are reused when size and
//! modification date are unchanged, so a second pass over an untouched
//! volume reads no file contents.
//!
//! # Example
//!
//! ```rust,no_run
//! use dupsweep_core::Catalog;
//! use dupsweep_scan::{IngestConfig, Ingestor};
//!
//! let mut catalog = Catalog::default();
//! let disk = catalog.register_disk("3f1c-55aa", 2_000_000_000_000, "Backup A");
//!
//! let ingestor = Ingestor::new();
//! let report = ingestor
//!     .ingest(&mut catalog, disk, &IngestConfig::new("/mnt/backup-a"))
//!     .unwrap();
//! println!("hashed {} files, {} cached", report.hashed, report.cached);
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! use dupsweep_scan::Ingestor;
//!
//! let ingestor = Ingestor::new();
//! let mut progress_rx = ingestor.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(progress) = progress_rx.blocking_recv() {
//!         println!("{} files committed", progress.files_committed());
//!     }
//! });
//! ```

mod config;
mod error;
mod hasher;
mod ingest;
mod progress;
mod walker;

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{ScanError, ScanWarning, WarningKind};
pub use hasher::{Blake3Provider, DigestProvider};
pub use ingest::{IngestReport, Ingestor};
pub use progress::IngestProgress;
pub use walker::{Walk, WalkEntry, walk};
