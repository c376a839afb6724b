//! Serializable catalog snapshots.
//!
//! Only owned data is stored: parent links, content links and records.
//! Child indexes, cached paths and reference counts are rebuilt on restore.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::content::{ContentRecord, ContentStore, ContentType, ContentTypes};
use crate::error::{CatalogError, CatalogResult};
use crate::node::{Disk, FsNode};
use crate::tree::FsTree;

/// Flat, ordered dump of a catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub content_types: Vec<ContentType>,
    pub disks: Vec<Disk>,
    pub content: Vec<ContentRecord>,
    pub nodes: Vec<FsNode>,
}

impl Catalog {
    /// Dump the catalog, every list sorted by key.
    pub fn snapshot(&self) -> CatalogSnapshot {
        let mut content: Vec<ContentRecord> = self.content.iter().cloned().collect();
        content.sort_by_key(|r| r.id);
        let mut nodes: Vec<FsNode> = self.tree.iter().cloned().collect();
        nodes.sort_by_key(|n| n.id);

        CatalogSnapshot {
            content_types: self.content.types().iter().cloned().collect(),
            disks: self.tree.disks().cloned().collect(),
            content,
            nodes,
        }
    }

    /// Rebuild a catalog from a snapshot and validate it.
    pub fn restore(snapshot: CatalogSnapshot, config: CatalogConfig) -> CatalogResult<Self> {
        let mut types = ContentTypes::new();
        for content_type in snapshot.content_types {
            types.register(content_type.name, content_type.extensions.iter())?;
        }

        let mut content = ContentStore::new(types);
        for record in snapshot.content {
            content.restore(record)?;
        }

        let mut tree = FsTree::new();
        for disk in snapshot.disks {
            tree.restore_disk(disk)?;
        }
        for node in snapshot.nodes {
            if node.is_file() && node.parent.is_none() {
                return Err(CatalogError::invariant(format!("file {} has no parent", node.id)));
            }
            if let Some(id) = node.content {
                content.acquire(id)?;
            }
            tree.restore_node(node)?;
        }
        tree.relink()?;

        let catalog = Catalog {
            tree,
            content,
            config,
        };
        catalog.check_integrity()?;

        let stats = catalog.stats();
        info!(
            disks = stats.disks,
            files = stats.files,
            records = stats.content_records,
            "restored catalog"
        );
        Ok(catalog)
    }
}
