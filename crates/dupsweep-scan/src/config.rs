//! Ingestion configuration.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for one ingestion pass over a volume.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct IngestConfig {
    /// Root path of the volume (or the subtree standing in for it).
    pub root: PathBuf,

    /// Hashing threads (0 = rayon default pool).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Bound of the queue between hashing workers and the writer.
    #[builder(default = "256")]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Follow symbolic links.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Exact entry names to leave out (e.g. `.Trashes`).
    #[builder(default)]
    #[serde(default)]
    pub ignore_names: Vec<String>,

    /// After an uninterrupted walk, drop catalogued entries that are gone.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub prune_missing: bool,
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

impl IngestConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.root {
            Some(root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            Some(_) => {}
        }
        if self.queue_capacity == Some(0) {
            return Err("Queue capacity must be positive".to_string());
        }
        Ok(())
    }
}

impl IngestConfig {
    /// Create a new config builder.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Create a config with defaults for the given root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            threads: 0,
            queue_capacity: default_queue_capacity(),
            follow_symlinks: false,
            include_hidden: true,
            ignore_names: Vec::new(),
            prune_missing: true,
        }
    }

    /// Whether an entry name is excluded from the walk.
    pub fn should_ignore(&self, name: &str) -> bool {
        self.ignore_names.iter().any(|n| n == name)
    }
}
