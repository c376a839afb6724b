//! Per-disk filesystem tree store.
//!
//! Nodes live in an arena addressed by [`NodeId`]; a parent link is an
//! optional key into the same arena. Structural edits never follow live
//! references: subtree removal first collects keys, then removes them
//! children-first.

use std::collections::{BTreeMap, HashMap};

use compact_str::CompactString;
use tracing::warn;

use crate::error::{CatalogError, CatalogResult};
use crate::node::{ContentId, Disk, DiskId, FsNode, NodeId, join_path};

/// Arena of tree nodes for every registered disk.
#[derive(Debug, Clone, Default)]
pub struct FsTree {
    nodes: HashMap<NodeId, FsNode>,
    disks: BTreeMap<DiskId, Disk>,
    disk_by_uuid: HashMap<CompactString, DiskId>,
    next_node: u64,
    next_disk: u64,
}

impl FsTree {
    /// Create an empty tree store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a disk, or return the existing one with the same UUID.
    ///
    /// Label edits are applied; a changed capacity is reported and ignored.
    pub fn register_disk(
        &mut self,
        uuid: impl Into<CompactString>,
        capacity: u64,
        label: impl Into<CompactString>,
    ) -> DiskId {
        let uuid = uuid.into();
        let label = label.into();

        if let Some(&id) = self.disk_by_uuid.get(&uuid) {
            if let Some(disk) = self.disks.get_mut(&id) {
                if disk.capacity != capacity {
                    warn!(
                        disk = %uuid,
                        recorded = disk.capacity,
                        observed = capacity,
                        "disk capacity changed, keeping recorded value"
                    );
                }
                if disk.label != label {
                    warn!(disk = %uuid, from = %disk.label, to = %label, "disk label changed");
                    disk.label = label;
                }
            }
            return id;
        }

        let id = DiskId(self.next_disk);
        self.next_disk += 1;
        let root = self.alloc_id();
        self.nodes.insert(
            root,
            FsNode::new_directory(root, "", None, id, CompactString::default()),
        );
        self.disk_by_uuid.insert(uuid.clone(), id);
        self.disks.insert(
            id,
            Disk {
                id,
                uuid,
                capacity,
                label,
                root,
            },
        );
        id
    }

    /// Get a disk by key.
    pub fn disk(&self, id: DiskId) -> Option<&Disk> {
        self.disks.get(&id)
    }

    /// Get a disk by its volume UUID.
    pub fn disk_by_uuid(&self, uuid: &str) -> Option<&Disk> {
        self.disk_by_uuid.get(uuid).and_then(|id| self.disks.get(id))
    }

    /// Iterate over disks in registration order.
    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        self.disks.values()
    }

    /// Root node of a disk.
    pub fn root(&self, disk: DiskId) -> CatalogResult<NodeId> {
        self.disks
            .get(&disk)
            .map(|d| d.root)
            .ok_or(CatalogError::UnknownDisk { disk })
    }

    /// Get a node by key.
    pub fn node(&self, id: NodeId) -> Option<&FsNode> {
        self.nodes.get(&id)
    }

    /// Get a node by key, failing when absent.
    pub fn get(&self, id: NodeId) -> CatalogResult<&FsNode> {
        self.nodes.get(&id).ok_or(CatalogError::UnknownNode { node: id })
    }

    /// Number of nodes, disk roots included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &FsNode> {
        self.nodes.values()
    }

    /// Resolve a path (segments below the disk root) to a node.
    pub fn lookup<S: AsRef<str>>(&self, disk: DiskId, segments: &[S]) -> Option<NodeId> {
        let mut current = self.disks.get(&disk)?.root;
        for segment in segments {
            current = self.nodes.get(&current)?.child(segment.as_ref())?;
        }
        Some(current)
    }

    /// Full path of a node from its disk root.
    pub fn path_of(&self, id: NodeId) -> CatalogResult<&str> {
        self.get(id).map(FsNode::path)
    }

    /// Rebuild a path by walking parent links, ignoring the cache.
    pub fn walk_path(&self, id: NodeId) -> CatalogResult<String> {
        let mut names = Vec::new();
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.nodes.get(&parent).ok_or_else(|| {
                CatalogError::invariant(format!("node {} has vanished parent {parent}", current.id))
            })?;
            if names.len() > self.nodes.len() {
                return Err(CatalogError::invariant(format!("parent cycle through {id}")));
            }
        }
        names.reverse();
        Ok(names.join("/"))
    }

    /// All nodes of a subtree in pre-order, `id` first.
    pub fn subtree(&self, id: NodeId) -> CatalogResult<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.nodes.get(&current).ok_or_else(|| {
                CatalogError::invariant(format!("child {current} listed but not stored"))
            })?;
            order.push(current);
            // Reverse so that name order is preserved when popping.
            stack.extend(node.children.values().rev().copied());
        }
        Ok(order)
    }

    fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Create a child below `parent`. The name must be free.
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        content: Option<ContentId>,
    ) -> CatalogResult<NodeId> {
        let (disk, path) = {
            let parent_node = self.get(parent)?;
            if parent_node.is_file() {
                return Err(CatalogError::invariant(format!(
                    "cannot add '{name}' below file '{}'",
                    parent_node.path
                )));
            }
            if parent_node.children.contains_key(name) {
                return Err(CatalogError::invariant(format!(
                    "'{name}' already exists below '{}'",
                    parent_node.path
                )));
            }
            (parent_node.disk, join_path(&parent_node.path, name))
        };

        let id = self.alloc_id();
        let mut node = FsNode::new_directory(id, name, Some(parent), disk, path);
        node.content = content;
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(CompactString::from(name), id);
        }
        Ok(id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> CatalogResult<&mut FsNode> {
        self.nodes.get_mut(&id).ok_or(CatalogError::UnknownNode { node: id })
    }

    /// Unlink a node from its parent's child index.
    pub(crate) fn detach(&mut self, id: NodeId) -> CatalogResult<()> {
        let (parent, name) = {
            let node = self.get(id)?;
            match node.parent {
                Some(parent) => (parent, node.name.clone()),
                None => return Err(CatalogError::RootDeletion { disk: node.disk }),
            }
        };
        let parent_node = self.nodes.get_mut(&parent).ok_or_else(|| {
            CatalogError::invariant(format!("node {id} has vanished parent {parent}"))
        })?;
        if parent_node.children.remove(&name) != Some(id) {
            return Err(CatalogError::invariant(format!(
                "parent {parent} does not list '{name}' as {id}"
            )));
        }
        Ok(())
    }

    /// Remove one node whose children are already gone.
    pub(crate) fn remove_leafward(&mut self, id: NodeId) -> CatalogResult<FsNode> {
        let node = self.get(id)?;
        if let Some(child) = node.children.values().find(|c| self.nodes.contains_key(c)) {
            return Err(CatalogError::invariant(format!(
                "removing {id} would orphan child {child}"
            )));
        }
        self.nodes
            .remove(&id)
            .ok_or(CatalogError::UnknownNode { node: id })
    }

    /// Drop a disk whose tree is already down to its root.
    pub(crate) fn remove_disk(&mut self, id: DiskId) -> CatalogResult<Disk> {
        let root = self.root(id)?;
        if self.get(root)?.child_count() > 0 {
            return Err(CatalogError::invariant(format!(
                "disk {id:?} still has catalogued entries"
            )));
        }
        self.nodes.remove(&root);
        let disk = self
            .disks
            .remove(&id)
            .ok_or(CatalogError::UnknownDisk { disk: id })?;
        self.disk_by_uuid.remove(&disk.uuid);
        Ok(disk)
    }

    /// Re-insert a disk from a snapshot.
    pub(crate) fn restore_disk(&mut self, disk: Disk) -> CatalogResult<()> {
        if self.disk_by_uuid.contains_key(&disk.uuid) || self.disks.contains_key(&disk.id) {
            return Err(CatalogError::invariant(format!(
                "disk {} appears twice in snapshot",
                disk.uuid
            )));
        }
        self.next_disk = self.next_disk.max(disk.id.0 + 1);
        self.disk_by_uuid.insert(disk.uuid.clone(), disk.id);
        self.disks.insert(disk.id, disk);
        Ok(())
    }

    /// Re-insert a node from a snapshot; links and paths are rebuilt later.
    pub(crate) fn restore_node(&mut self, mut node: FsNode) -> CatalogResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(CatalogError::invariant(format!("node {} appears twice in snapshot", node.id)));
        }
        node.children.clear();
        node.path = CompactString::default();
        self.next_node = self.next_node.max(node.id.0 + 1);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Rebuild child indexes and cached paths from parent links.
    pub(crate) fn relink(&mut self) -> CatalogResult<()> {
        let mut links: Vec<(NodeId, NodeId, CompactString)> = self
            .nodes
            .values()
            .filter_map(|n| n.parent.map(|p| (p, n.id, n.name.clone())))
            .collect();
        links.sort_by_key(|(_, id, _)| *id);

        for (parent, id, name) in links {
            let parent_node = self.nodes.get_mut(&parent).ok_or_else(|| {
                CatalogError::invariant(format!("node {id} references missing parent {parent}"))
            })?;
            if parent_node.children.insert(name.clone(), id).is_some() {
                return Err(CatalogError::invariant(format!(
                    "two children named '{name}' below {parent}"
                )));
            }
        }

        let roots: Vec<NodeId> = self.disks.values().map(|d| d.root).collect();
        let mut reached = 0usize;
        for root in roots {
            let mut stack = vec![root];
            while let Some(current) = stack.pop() {
                reached += 1;
                if reached > self.nodes.len() {
                    return Err(CatalogError::invariant("parent cycle in snapshot"));
                }
                let (path, children): (CompactString, Vec<NodeId>) = {
                    let node = self.get(current)?;
                    (node.path.clone(), node.children.values().copied().collect())
                };
                for child in children {
                    let child_node = self.get_mut(child)?;
                    child_node.path = join_path(&path, &child_node.name);
                    stack.push(child);
                }
            }
        }

        if reached != self.nodes.len() {
            return Err(CatalogError::invariant(format!(
                "{} node(s) unreachable from any disk root",
                self.nodes.len() - reached
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_disk_is_idempotent() {
        let mut tree = FsTree::new();
        let a = tree.register_disk("uuid-1", 100, "Backup");
        let b = tree.register_disk("uuid-1", 200, "Renamed");
        assert_eq!(a, b);

        let disk = tree.disk(a).unwrap();
        assert_eq!(disk.capacity, 100);
        assert_eq!(disk.label, "Renamed");
        assert!(tree.node(disk.root).unwrap().is_root());
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tree = FsTree::new();
        let disk = tree.register_disk("uuid-1", 0, "");
        let root = tree.root(disk).unwrap();
        let data = tree.insert_child(root, "Data", None).unwrap();
        let photos = tree.insert_child(data, "Photos", None).unwrap();

        assert_eq!(tree.lookup(disk, &["Data", "Photos"]), Some(photos));
        assert_eq!(tree.path_of(photos).unwrap(), "Data/Photos");
        assert_eq!(tree.walk_path(photos).unwrap(), "Data/Photos");
        assert!(tree.insert_child(data, "Photos", None).is_err());
    }

    #[test]
    fn test_subtree_preorder() {
        let mut tree = FsTree::new();
        let disk = tree.register_disk("uuid-1", 0, "");
        let root = tree.root(disk).unwrap();
        let a = tree.insert_child(root, "a", None).unwrap();
        let b = tree.insert_child(a, "b", None).unwrap();
        let c = tree.insert_child(a, "c", None).unwrap();

        assert_eq!(tree.subtree(a).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn test_remove_disk_requires_empty_tree() {
        let mut tree = FsTree::new();
        let disk = tree.register_disk("uuid-1", 0, "");
        let root = tree.root(disk).unwrap();
        let a = tree.insert_child(root, "a", None).unwrap();
        assert!(tree.remove_disk(disk).is_err());

        tree.detach(a).unwrap();
        tree.remove_leafward(a).unwrap();
        let removed = tree.remove_disk(disk).unwrap();
        assert_eq!(removed.uuid, "uuid-1");
        assert!(tree.disk_by_uuid("uuid-1").is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_refuses_to_orphan() {
        let mut tree = FsTree::new();
        let disk = tree.register_disk("uuid-1", 0, "");
        let root = tree.root(disk).unwrap();
        let a = tree.insert_child(root, "a", None).unwrap();
        tree.insert_child(a, "b", None).unwrap();

        let err = tree.remove_leafward(a).unwrap_err();
        assert!(matches!(err, CatalogError::InvariantViolation { .. }));
    }
}
