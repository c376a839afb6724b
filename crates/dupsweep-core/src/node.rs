//! Identifiers, content digests and filesystem tree nodes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Unique identifier for a node within the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a new NodeId from a u64.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Catalog-local key of a registered disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiskId(pub u64);

/// Catalog-local key of a content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId(pub u64);

/// Fixed-width content digest, rendered as lowercase hex.
///
/// The width is whatever the injected hash provider produces (160 bits for
/// SHA-1, 256 bits for BLAKE3); the catalog only relies on equality.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest(Box<[u8]>);

impl ContentDigest {
    /// Create a digest from raw bytes.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a digest from its hex rendering.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.is_empty() || hex.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        Some(Self(bytes.into_boxed_slice()))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the digest as a hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First eight hex characters, for log lines and listings.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid digest hex: {value}"))
    }
}

/// One scanned storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    /// Catalog-local key.
    pub id: DiskId,
    /// Volume-unique identifier (usually a filesystem UUID).
    pub uuid: CompactString,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Human label.
    pub label: CompactString,
    /// Synthetic root node of this disk's tree.
    pub root: NodeId,
}

/// One path segment of a disk's tree: a directory or a leaf file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsNode {
    /// Unique identifier for this node.
    pub id: NodeId,

    /// Path segment (not a full path). Empty for a disk root.
    pub name: CompactString,

    /// Parent directory, `None` only for the synthetic disk root.
    pub parent: Option<NodeId>,

    /// Owning disk.
    pub disk: DiskId,

    /// File modification date as last observed.
    pub modified: Option<DateTime<Utc>>,

    /// Linked content record; set only for leaf (file) nodes.
    pub content: Option<ContentId>,

    /// When the content digest was last computed or verified.
    pub content_read: Option<DateTime<Utc>>,

    /// Full path from the disk root, segments joined by `/`.
    #[serde(skip)]
    pub(crate) path: CompactString,

    /// Children by name (directories only).
    #[serde(skip)]
    pub(crate) children: BTreeMap<CompactString, NodeId>,
}

impl FsNode {
    pub(crate) fn new_directory(
        id: NodeId,
        name: impl Into<CompactString>,
        parent: Option<NodeId>,
        disk: DiskId,
        path: CompactString,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            disk,
            modified: None,
            content: None,
            content_read: None,
            path,
            children: BTreeMap::new(),
        }
    }

    /// A node as loaded from storage, not yet linked into a tree.
    ///
    /// The cached path and child index are rebuilt by [`crate::Catalog::restore`].
    pub fn unlinked(
        id: NodeId,
        name: impl Into<CompactString>,
        parent: Option<NodeId>,
        disk: DiskId,
    ) -> Self {
        Self::new_directory(id, name, parent, disk, CompactString::default())
    }

    /// Check if this node is a leaf file.
    pub fn is_file(&self) -> bool {
        self.content.is_some()
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.content.is_none()
    }

    /// Check if this node is the synthetic root of a disk.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Cached full path from the disk root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    /// Look up a direct child by name.
    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }
}

/// Join a parent path and a segment the way node paths are cached.
pub(crate) fn join_path(parent: &str, name: &str) -> CompactString {
    if parent.is_empty() {
        CompactString::from(name)
    } else {
        let mut path = CompactString::with_capacity(parent.len() + name.len() + 1);
        path.push_str(parent);
        path.push('/');
        path.push_str(name);
        path
    }
}

/// Split a file name into canonical name and extension.
///
/// Dot-files (`.bashrc`) and names without a dot have no extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if !file_name.starts_with('.') => (&file_name[..idx], &file_name[idx + 1..]),
        _ => (file_name, ""),
    }
}
