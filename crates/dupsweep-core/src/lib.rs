//! Core catalog for dupsweep.
//!
//! This crate holds the content store (one record per distinct content
//! digest) and the per-disk filesystem tree store whose leaves link to it.
//! Both live behind the single-writer [`Catalog`] facade.

mod catalog;
mod config;
mod content;
mod error;
mod node;
mod snapshot;
mod tree;

pub use catalog::{
    Catalog, CatalogStats, ContentGroup, DeleteSummary, DirectoryGroup, RecordOutcome,
};
pub use config::{CatalogConfig, CatalogConfigBuilder};
pub use content::{ContentRecord, ContentStore, ContentType, ContentTypes};
pub use error::{CatalogError, CatalogResult};
pub use node::{ContentDigest, ContentId, Disk, DiskId, FsNode, NodeId, split_extension};
pub use snapshot::CatalogSnapshot;
pub use tree::FsTree;
