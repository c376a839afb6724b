//! Catalog configuration types.

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for a catalog instance.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct CatalogConfig {
    /// Digests read at or before this instant are expired and get recomputed.
    #[builder(default)]
    #[serde(default)]
    pub rehash_before: Option<DateTime<Utc>>,

    /// Remove content records as soon as their last node goes away.
    ///
    /// When false, unreferenced records stay until `collect_orphans`.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub eager_orphan_removal: bool,
}

fn default_true() -> bool {
    true
}

impl CatalogConfig {
    /// Create a new catalog config builder.
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }

    /// Whether a digest read at `read_at` is still usable.
    pub fn digest_is_fresh(&self, read_at: Option<DateTime<Utc>>) -> bool {
        match (read_at, self.rehash_before) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(read), Some(cutoff)) => read > cutoff,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            rehash_before: None,
            eager_orphan_removal: true,
        }
    }
}
