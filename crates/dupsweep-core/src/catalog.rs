//! The catalog: disks, their trees, and the content records the leaves link to.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::CatalogConfig;
use crate::content::{ContentRecord, ContentStore, ContentTypes};
use crate::error::{CatalogError, CatalogResult};
use crate::node::{ContentDigest, ContentId, Disk, DiskId, FsNode, NodeId, split_extension};
use crate::tree::FsTree;

/// Result of recording one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Leaf node for the file.
    pub node: NodeId,
    /// Content record the leaf links to.
    pub content: ContentId,
    /// Whether the digest provider was invoked.
    pub hashed: bool,
}

/// What a subtree deletion removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub nodes_removed: usize,
    pub files_removed: usize,
    /// Sum of leaf sizes in the removed subtree.
    pub bytes_removed: u64,
    /// Content records dropped because nothing links to them anymore.
    pub content_removed: usize,
}

impl DeleteSummary {
    /// Accumulate another summary into this one.
    pub fn merge(&mut self, other: DeleteSummary) {
        self.nodes_removed += other.nodes_removed;
        self.files_removed += other.files_removed;
        self.bytes_removed += other.bytes_removed;
        self.content_removed += other.content_removed;
    }
}

/// Leaves sharing one content record.
#[derive(Debug, Clone, Serialize)]
pub struct ContentGroup {
    pub content: ContentId,
    pub digest: ContentDigest,
    pub size: u64,
    /// Linked leaves, ordered by disk then path.
    pub nodes: Vec<NodeId>,
}

impl ContentGroup {
    /// Bytes that could be reclaimed by keeping a single copy.
    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.nodes.len() as u64).saturating_sub(1)
    }
}

/// Directories holding exactly the same set of file contents.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryGroup {
    /// Distinct contents of the direct file children, in key order.
    pub contents: Vec<ContentId>,
    /// Sum of the distinct content sizes.
    pub size: u64,
    /// Matching directories, ordered by disk then path.
    pub directories: Vec<NodeId>,
}

impl DirectoryGroup {
    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.directories.len() as u64).saturating_sub(1)
    }
}

/// Summary counts of a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub disks: usize,
    pub directories: usize,
    pub files: usize,
    pub content_records: usize,
    pub orphan_records: usize,
    /// Sum of all leaf sizes, duplicates counted every time.
    pub total_bytes: u64,
    /// Sum of sizes of referenced content records.
    pub unique_bytes: u64,
}

/// Single-writer catalog of disks, trees and content records.
///
/// Mutation goes through `&mut self`; concurrent readers can share `&Catalog`
/// between mutations.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub(crate) tree: FsTree,
    pub(crate) content: ContentStore,
    pub(crate) config: CatalogConfig,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(config: CatalogConfig, types: ContentTypes) -> Self {
        Self {
            tree: FsTree::new(),
            content: ContentStore::new(types),
            config,
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn tree(&self) -> &FsTree {
        &self.tree
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Register a disk (idempotent by UUID).
    pub fn register_disk(
        &mut self,
        uuid: impl Into<CompactString>,
        capacity: u64,
        label: impl Into<CompactString>,
    ) -> DiskId {
        self.tree.register_disk(uuid, capacity, label)
    }

    pub fn disk(&self, id: DiskId) -> Option<&Disk> {
        self.tree.disk(id)
    }

    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        self.tree.disks()
    }

    pub fn node(&self, id: NodeId) -> Option<&FsNode> {
        self.tree.node(id)
    }

    /// Direct children of a node, in name order.
    pub fn children(&self, id: NodeId) -> CatalogResult<Vec<NodeId>> {
        Ok(self.tree.get(id)?.children().collect())
    }

    pub fn path_of(&self, id: NodeId) -> CatalogResult<&str> {
        self.tree.path_of(id)
    }

    pub fn lookup<S: AsRef<str>>(&self, disk: DiskId, segments: &[S]) -> Option<NodeId> {
        self.tree.lookup(disk, segments)
    }

    /// Content record linked from a leaf.
    pub fn content_of(&self, id: NodeId) -> Option<&ContentRecord> {
        self.tree
            .node(id)
            .and_then(|n| n.content)
            .and_then(|c| self.content.get(c))
    }

    /// Return the directory at `segments`, creating missing ones.
    ///
    /// A leaf found where a directory is expected has changed kind on disk;
    /// it is deleted and replaced.
    pub fn ensure_directory<S: AsRef<str>>(
        &mut self,
        disk: DiskId,
        segments: &[S],
    ) -> CatalogResult<NodeId> {
        let mut current = self.tree.root(disk)?;
        for segment in segments {
            let name = checked_segment(segment.as_ref())?;
            let existing = self.tree.get(current)?.child(name);
            current = match existing {
                Some(child) => {
                    let node = self.tree.get(child)?;
                    if node.is_dir() {
                        child
                    } else {
                        warn!(path = %node.path(), "file became a directory");
                        self.delete_subtree(child)?;
                        self.tree.insert_child(current, name, None)?
                    }
                }
                None => self.tree.insert_child(current, name, None)?,
            };
        }
        Ok(current)
    }

    /// Digest cached on the leaf at `segments`, when it can be reused for a
    /// file of this size and modification date.
    pub fn cached_digest<S: AsRef<str>>(
        &self,
        disk: DiskId,
        segments: &[S],
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Option<&ContentDigest> {
        let node = self.tree.node(self.tree.lookup(disk, segments)?)?;
        self.reusable(node, size, modified).map(|r| &r.digest)
    }

    fn reusable(
        &self,
        node: &FsNode,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Option<&ContentRecord> {
        let record = self.content.get(node.content?)?;
        (record.size == size
            && node.modified == modified
            && self.config.digest_is_fresh(node.content_read))
        .then_some(record)
    }

    /// Record a file observed at `segments` on `disk`.
    ///
    /// `provider` is called only when no reusable digest is cached. When it
    /// fails nothing is committed for this path.
    pub fn record_file<S, F>(
        &mut self,
        disk: DiskId,
        segments: &[S],
        size: u64,
        modified: Option<DateTime<Utc>>,
        provider: F,
    ) -> CatalogResult<RecordOutcome>
    where
        S: AsRef<str>,
        F: FnOnce() -> std::io::Result<ContentDigest>,
    {
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| CatalogError::invariant("cannot record a file with an empty path"))?;
        let name = checked_segment(name.as_ref())?;

        // Fail early on unknown disks before touching anything.
        self.tree.root(disk)?;

        let existing = self
            .tree
            .lookup(disk, parents)
            .and_then(|dir| self.tree.node(dir))
            .and_then(|dir| dir.child(name));

        let mut replaced_dir = None;
        if let Some(id) = existing {
            let node = self.tree.get(id)?;
            if node.is_dir() {
                replaced_dir = Some(id);
            } else if let Some(record) = self.reusable(node, size, modified) {
                trace!(path = %node.path(), digest = %record.digest.short(), "reusing cached digest");
                return Ok(RecordOutcome {
                    node: id,
                    content: record.id,
                    hashed: false,
                });
            }
        }

        let digest = provider().map_err(|source| CatalogError::DigestFailed {
            path: segments.iter().map(|s| s.as_ref()).collect::<PathBuf>(),
            source,
        })?;

        let existing = match replaced_dir {
            Some(dir) => {
                warn!(path = %self.tree.path_of(dir)?, "directory became a file");
                self.delete_subtree(dir)?;
                None
            }
            None => existing,
        };

        let (stem, extension) = split_extension(name);
        let observed = modified.unwrap_or_else(Utc::now);
        let now = Utc::now();

        let (node, content) = match existing {
            Some(id) => {
                let content = self.content.intern(digest, size, observed, stem, extension)?;
                let previous = self.tree.get(id)?.content;
                if previous != Some(content) {
                    self.content.acquire(content)?;
                    if let Some(old) = previous {
                        self.release_content(old)?;
                    }
                }
                (id, content)
            }
            None => {
                let parent = self.ensure_directory(disk, parents)?;
                let fresh = self.content.by_digest(&digest).is_none();
                let content = self.content.intern(digest, size, observed, stem, extension)?;
                let id = match self.tree.insert_child(parent, name, Some(content)) {
                    Ok(id) => id,
                    Err(err) => {
                        if fresh {
                            self.content.remove(content);
                        }
                        return Err(err);
                    }
                };
                self.content.acquire(content)?;
                (id, content)
            }
        };

        let leaf = self.tree.get_mut(node)?;
        leaf.modified = modified;
        leaf.content_read = Some(now);
        debug!(path = %leaf.path(), size, "recorded file");

        Ok(RecordOutcome {
            node,
            content,
            hashed: true,
        })
    }

    /// Drop one reference and, when configured, the record it leaves orphaned.
    fn release_content(&mut self, id: ContentId) -> CatalogResult<bool> {
        if self.content.release(id)? && self.config.eager_orphan_removal {
            self.content.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove a node and all its descendants.
    ///
    /// Every removed leaf releases its content reference. Descendants are
    /// removed before their ancestors so no node ever points at a missing
    /// parent.
    pub fn delete_subtree(&mut self, id: NodeId) -> CatalogResult<DeleteSummary> {
        let target = self.tree.get(id)?;
        if target.is_root() {
            return Err(CatalogError::RootDeletion { disk: target.disk });
        }

        let order = self.tree.subtree(id)?;
        self.tree.detach(id)?;

        let mut summary = DeleteSummary::default();
        for node_id in order.into_iter().rev() {
            let removed = self.tree.remove_leafward(node_id)?;
            summary.nodes_removed += 1;
            if let Some(content) = removed.content {
                summary.files_removed += 1;
                summary.bytes_removed += self.content.get(content).map_or(0, |r| r.size);
                if self.release_content(content)? {
                    summary.content_removed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Delete every child of `dir` whose name is not in `keep`.
    ///
    /// Used after a complete directory listing to drop entries that vanished.
    pub fn retain_children(
        &mut self,
        dir: NodeId,
        keep: &HashSet<CompactString>,
    ) -> CatalogResult<DeleteSummary> {
        let gone: Vec<(CompactString, NodeId)> = self
            .tree
            .get(dir)?
            .children
            .iter()
            .filter(|(name, _)| !keep.contains(*name))
            .map(|(name, id)| (name.clone(), *id))
            .collect();

        let mut summary = DeleteSummary::default();
        for (name, id) in gone {
            debug!(dir = %self.tree.path_of(dir)?, %name, "pruning vanished entry");
            summary.merge(self.delete_subtree(id)?);
        }
        Ok(summary)
    }

    /// Forget a disk and everything catalogued on it.
    ///
    /// Content references are released like in [`Catalog::delete_subtree`];
    /// records left unreferenced follow `eager_orphan_removal`.
    pub fn remove_disk(&mut self, disk: DiskId) -> CatalogResult<DeleteSummary> {
        let root = self.tree.root(disk)?;
        let mut summary = DeleteSummary::default();
        for child in self.children(root)? {
            summary.merge(self.delete_subtree(child)?);
        }
        let removed = self.tree.remove_disk(disk)?;
        summary.nodes_removed += 1;
        debug!(
            disk = %removed.uuid,
            files = summary.files_removed,
            "disk removed from catalog"
        );
        Ok(summary)
    }

    /// Remove every content record no leaf links to. Returns how many.
    pub fn collect_orphans(&mut self) -> usize {
        let orphans = self.content.orphans();
        for id in &orphans {
            self.content.remove(*id);
        }
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "collected orphan content records");
        }
        orphans.len()
    }

    /// Content records linked from two or more leaves, largest waste first.
    pub fn content_groups(&self) -> Vec<ContentGroup> {
        let mut linked: BTreeMap<ContentId, Vec<&FsNode>> = BTreeMap::new();
        for node in self.tree.iter() {
            if let Some(content) = node.content {
                linked.entry(content).or_default().push(node);
            }
        }

        let mut groups: Vec<ContentGroup> = linked
            .into_iter()
            .filter(|(_, nodes)| nodes.len() > 1)
            .filter_map(|(content, mut nodes)| {
                let record = self.content.get(content)?;
                nodes.sort_by(|a, b| (a.disk, a.path()).cmp(&(b.disk, b.path())));
                Some(ContentGroup {
                    content,
                    digest: record.digest.clone(),
                    size: record.size,
                    nodes: nodes.iter().map(|n| n.id).collect(),
                })
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_bytes()
                .cmp(&a.wasted_bytes())
                .then_with(|| a.content.cmp(&b.content))
        });
        groups
    }

    /// Directories whose direct files have identical contents, largest
    /// waste first. Names are ignored and subdirectories do not take part.
    pub fn directory_groups(&self) -> Vec<DirectoryGroup> {
        let mut by_contents: BTreeMap<Vec<ContentId>, Vec<&FsNode>> = BTreeMap::new();
        for dir in self.tree.iter().filter(|n| n.is_dir()) {
            let mut contents: Vec<ContentId> = dir
                .children()
                .filter_map(|c| self.tree.node(c).and_then(|n| n.content))
                .collect();
            if contents.is_empty() {
                continue;
            }
            contents.sort_unstable();
            contents.dedup();
            by_contents.entry(contents).or_default().push(dir);
        }

        let mut groups: Vec<DirectoryGroup> = by_contents
            .into_iter()
            .filter(|(_, dirs)| dirs.len() > 1)
            .map(|(contents, mut dirs)| {
                dirs.sort_by(|a, b| (a.disk, a.path()).cmp(&(b.disk, b.path())));
                let size = contents
                    .iter()
                    .filter_map(|c| self.content.get(*c))
                    .map(|r| r.size)
                    .sum();
                DirectoryGroup {
                    contents,
                    size,
                    directories: dirs.iter().map(|d| d.id).collect(),
                }
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_bytes()
                .cmp(&a.wasted_bytes())
                .then_with(|| a.directories.cmp(&b.directories))
        });
        groups
    }

    /// Summary counts.
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            disks: self.tree.disks().count(),
            content_records: self.content.len(),
            ..CatalogStats::default()
        };
        for node in self.tree.iter() {
            match node.content.and_then(|c| self.content.get(c)) {
                Some(record) => {
                    stats.files += 1;
                    stats.total_bytes += record.size;
                }
                None if node.is_root() => {}
                None => stats.directories += 1,
            }
        }
        for record in self.content.iter() {
            if record.ref_count() == 0 {
                stats.orphan_records += 1;
            } else {
                stats.unique_bytes += record.size;
            }
        }
        stats
    }

    /// Verify structural invariants. Any failure is a bug, never user error.
    pub fn check_integrity(&self) -> CatalogResult<()> {
        for disk in self.tree.disks() {
            let root = self.tree.get(disk.root).map_err(|_| {
                CatalogError::invariant(format!("disk {} has no root node", disk.uuid))
            })?;
            if !root.is_root() || root.disk != disk.id {
                return Err(CatalogError::invariant(format!(
                    "root of disk {} is not a disk root",
                    disk.uuid
                )));
            }
        }

        let mut refs: BTreeMap<ContentId, u64> = BTreeMap::new();
        for node in self.tree.iter() {
            match node.parent {
                Some(parent_id) => {
                    let parent = self.tree.node(parent_id).ok_or_else(|| {
                        CatalogError::invariant(format!("{} has vanished parent {parent_id}", node.id))
                    })?;
                    if parent.is_file() || parent.disk != node.disk {
                        return Err(CatalogError::invariant(format!(
                            "{} hangs below a file or another disk",
                            node.id
                        )));
                    }
                    if parent.child(&node.name) != Some(node.id) {
                        return Err(CatalogError::invariant(format!(
                            "{parent_id} does not list child '{}'",
                            node.name
                        )));
                    }
                }
                None => {
                    let owner = self.tree.disk(node.disk).map(|d| d.root);
                    if owner != Some(node.id) {
                        return Err(CatalogError::invariant(format!(
                            "{} has no parent but is not a disk root",
                            node.id
                        )));
                    }
                }
            }

            let walked = self.tree.walk_path(node.id)?;
            if walked != node.path() {
                return Err(CatalogError::invariant(format!(
                    "cached path '{}' differs from '{walked}'",
                    node.path()
                )));
            }

            for child in node.children() {
                let child_node = self.tree.node(child).ok_or_else(|| {
                    CatalogError::invariant(format!("{} lists missing child {child}", node.id))
                })?;
                if child_node.parent != Some(node.id) {
                    return Err(CatalogError::invariant(format!(
                        "child {child} does not point back at {}",
                        node.id
                    )));
                }
            }

            if let Some(content) = node.content {
                if node.child_count() > 0 {
                    return Err(CatalogError::invariant(format!("file {} has children", node.id)));
                }
                if self.content.get(content).is_none() {
                    return Err(CatalogError::invariant(format!(
                        "{} links to missing content {content:?}",
                        node.id
                    )));
                }
                *refs.entry(content).or_default() += 1;
            }
        }

        for record in self.content.iter() {
            let counted = refs.get(&record.id).copied().unwrap_or(0);
            if counted != record.ref_count() {
                return Err(CatalogError::invariant(format!(
                    "content {} has {} reference(s), {} counted",
                    record.digest,
                    record.ref_count(),
                    counted
                )));
            }
            if self.content.by_digest(&record.digest).map(|r| r.id) != Some(record.id) {
                return Err(CatalogError::invariant(format!(
                    "digest index out of sync for {}",
                    record.digest
                )));
            }
        }
        Ok(())
    }
}

fn checked_segment(segment: &str) -> CatalogResult<&str> {
    if segment.is_empty() || segment.contains('/') {
        return Err(CatalogError::invariant(format!("invalid path segment '{segment}'")));
    }
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> ContentDigest {
        ContentDigest::new(vec![byte; 20])
    }

    #[test]
    fn test_record_creates_parents() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        let outcome = catalog
            .record_file(disk, &["a", "b", "c.txt"], 3, None, || Ok(digest(1)))
            .unwrap();

        assert!(outcome.hashed);
        assert_eq!(catalog.path_of(outcome.node).unwrap(), "a/b/c.txt");
        let record = catalog.content_of(outcome.node).unwrap();
        assert_eq!(record.name, "c");
        assert_eq!(record.extension, "txt");
        catalog.check_integrity().unwrap();
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        let root = catalog.disk(disk).unwrap().root;
        assert!(matches!(
            catalog.delete_subtree(root),
            Err(CatalogError::RootDeletion { .. })
        ));
    }

    #[test]
    fn test_invalid_segment_rejected() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        assert!(catalog.ensure_directory(disk, &["a/b"]).is_err());
        assert!(catalog.ensure_directory(disk, &[""]).is_err());
        let empty: [&str; 0] = [];
        assert!(catalog.record_file(disk, &empty, 0, None, || Ok(digest(1))).is_err());
    }

    #[test]
    fn test_failed_digest_keeps_replaced_directory() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        catalog
            .record_file(disk, &["a", "x.txt"], 3, None, || Ok(digest(1)))
            .unwrap();

        let err = catalog
            .record_file(disk, &["a"], 5, None, || {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::DigestFailed { .. }));
        assert!(catalog.lookup(disk, &["a", "x.txt"]).is_some());
        assert_eq!(catalog.stats().files, 1);
        catalog.check_integrity().unwrap();
    }

    #[test]
    fn test_rejected_parent_leaves_no_record() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        let err = catalog
            .record_file(disk, &["a/b", "x.txt"], 3, None, || Ok(digest(1)))
            .unwrap_err();

        assert!(matches!(err, CatalogError::InvariantViolation { .. }));
        assert!(catalog.content().is_empty());
        catalog.check_integrity().unwrap();
    }

    #[test]
    fn test_unknown_disk() {
        let mut catalog = Catalog::default();
        let err = catalog
            .record_file(DiskId(7), &["x"], 1, None, || Ok(digest(1)))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownDisk { .. }));
    }

    #[test]
    fn test_stats_counts() {
        let mut catalog = Catalog::default();
        let disk = catalog.register_disk("uuid-1", 0, "Main");
        catalog.record_file(disk, &["a", "x"], 10, None, || Ok(digest(1))).unwrap();
        catalog.record_file(disk, &["b", "x"], 10, None, || Ok(digest(1))).unwrap();

        let stats = catalog.stats();
        assert_eq!(stats.disks, 1);
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.total_bytes, 20);
        assert_eq!(stats.unique_bytes, 10);
        assert_eq!(catalog.content_groups()[0].wasted_bytes(), 10);
    }
}
