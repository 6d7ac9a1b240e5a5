//! Tree node types.
//!
//! A [`FileNode`] is one slot of the node arena: its name, the non-owning
//! back-reference to its parent, the ordered handles of the children it owns,
//! the raw metadata reported by the filesystem, state flags, and (for
//! container kinds) the cumulative [`Totals`] of its subtree.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thin_vec::ThinVec;

use super::index_types::NodeId;

/// Name given to every dot entry.
pub const DOT_ENTRY_NAME: &str = "<Files>";

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    /// Plain file, symlink, or special file.
    File = 0,
    /// Directory
    Directory = 1,
    /// Bucket for a directory's direct file children.
    DotEntry = 2,
    /// Invisible container of the toplevel items.
    PseudoRoot = 3,
}

impl NodeKind {
    /// Returns true for kinds that own children.
    #[inline]
    pub fn is_container(self) -> bool {
        !matches!(self, Self::File)
    }
}

bitflags! {
    /// Read state and classification flags of a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct NodeFlags: u8 {
        /// A read job for this directory is queued or running.
        const PENDING_READ = 1 << 0;
        /// Matched an exclude rule; never read.
        const EXCLUDED = 1 << 1;
        /// Resides on a different device than its parent.
        const MOUNT_POINT = 1 << 2;
        /// The directory could not be listed.
        const READ_ERROR = 1 << 3;
        /// The pending read was cancelled by an abort.
        const ABORTED = 1 << 4;
        /// Deliberately not descended into.
        const NOT_DESCENDED = 1 << 5;
    }
}

impl NodeFlags {
    /// Flags that describe a finished state and survive a cache round trip.
    pub const PERSISTENT: Self = Self::EXCLUDED
        .union(Self::MOUNT_POINT)
        .union(Self::READ_ERROR)
        .union(Self::ABORTED)
        .union(Self::NOT_DESCENDED);
}

/// Raw filesystem metadata of a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Size in bytes.
    pub size: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Modification time as Unix timestamp (seconds). 0 means not available.
    pub mtime: i64,
    /// Hard link count.
    pub links: u64,
    pub uid: u32,
    pub gid: u32,
    /// Permission and file type bits.
    pub mode: u32,
    /// Device number, used for mount point detection.
    pub device: u64,
}

impl NodeMetadata {
    /// Creates metadata from file system metadata.
    #[cfg(unix)]
    pub fn from_fs_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: metadata.size(),
            blocks: metadata.blocks(),
            mtime: metadata.mtime(),
            links: metadata.nlink(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode(),
            device: metadata.dev(),
        }
    }

    /// Creates metadata from file system metadata.
    #[cfg(not(unix))]
    pub fn from_fs_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::time::UNIX_EPOCH;

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            size: metadata.len(),
            blocks: metadata.len().div_ceil(512),
            mtime,
            links: 1,
            uid: 0,
            gid: 0,
            mode: if metadata.permissions().readonly() { 0o444 } else { 0o644 },
            device: 0,
        }
    }
}

/// Cumulative values over a subtree, the node itself included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub size: u64,
    pub blocks: u64,
    /// Number of real items (files and directories, not dot entries).
    pub items: u64,
    pub files: u64,
    pub subdirs: u64,
    pub latest_mtime: i64,
}

impl Totals {
    /// Totals of a single node with no children.
    pub fn of_node(kind: NodeKind, metadata: &NodeMetadata) -> Self {
        match kind {
            NodeKind::File => Self {
                size: metadata.size,
                blocks: metadata.blocks,
                items: 1,
                files: 1,
                subdirs: 0,
                latest_mtime: metadata.mtime,
            },
            NodeKind::Directory => Self {
                size: metadata.size,
                blocks: metadata.blocks,
                items: 1,
                files: 0,
                subdirs: 1,
                latest_mtime: metadata.mtime,
            },
            NodeKind::DotEntry | NodeKind::PseudoRoot => Self::default(),
        }
    }

    /// Adds another subtree's totals to this one.
    pub fn add(&mut self, other: &Totals) {
        self.size = self.size.saturating_add(other.size);
        self.blocks = self.blocks.saturating_add(other.blocks);
        self.items = self.items.saturating_add(other.items);
        self.files = self.files.saturating_add(other.files);
        self.subdirs = self.subdirs.saturating_add(other.subdirs);
        self.latest_mtime = self.latest_mtime.max(other.latest_mtime);
    }
}

// ---------------------------------------------------------------------------
// FileNode
// ---------------------------------------------------------------------------

/// A node in the directory tree arena.
#[derive(Debug, Clone)]
pub struct FileNode {
    name: Box<str>,
    parent: Option<NodeId>,
    kind: NodeKind,
    /// Child node handles in insertion order (empty for files).
    pub(crate) children: ThinVec<NodeId>,
    pub metadata: NodeMetadata,
    pub flags: NodeFlags,
    pub(crate) totals: Totals,
}

impl FileNode {
    /// Creates a new node with totals covering only itself.
    pub fn new(
        parent: Option<NodeId>,
        name: impl Into<Box<str>>,
        kind: NodeKind,
        metadata: NodeMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            kind,
            children: ThinVec::new(),
            totals: Totals::of_node(kind, &metadata),
            metadata,
            flags: NodeFlags::empty(),
        }
    }

    /// Returns the path component (full path for toplevel items).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parent node handle, if any.
    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    #[inline]
    pub fn is_dot_entry(&self) -> bool {
        self.kind == NodeKind::DotEntry
    }

    /// Child handles in insertion order.
    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Cumulative values of the subtree rooted here.
    #[inline]
    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Returns true while a read job for this directory is outstanding.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.flags.contains(NodeFlags::PENDING_READ)
    }

    /// Returns true if listing this directory failed.
    #[inline]
    pub fn has_read_error(&self) -> bool {
        self.flags.contains(NodeFlags::READ_ERROR)
    }

    /// Returns true if this node is a mount point.
    #[inline]
    pub fn is_mount_point(&self) -> bool {
        self.flags.contains(NodeFlags::MOUNT_POINT)
    }

    /// Returns true if this node was excluded from reading.
    #[inline]
    pub fn is_excluded(&self) -> bool {
        self.flags.contains(NodeFlags::EXCLUDED)
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    /// Removes a child handle, returns true if it was present.
    pub(crate) fn remove_child(&mut self, child: NodeId) -> bool {
        if let Some(pos) = self.children.iter().position(|&c| c == child) {
            self.children.remove(pos);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Slab;

    fn metadata(size: u64, mtime: i64) -> NodeMetadata {
        NodeMetadata {
            size,
            blocks: size.div_ceil(512),
            mtime,
            ..NodeMetadata::default()
        }
    }

    #[test]
    fn file_totals_count_the_file_itself() {
        let totals = Totals::of_node(NodeKind::File, &metadata(1000, 5));
        assert_eq!(totals.size, 1000);
        assert_eq!(totals.blocks, 2);
        assert_eq!(totals.items, 1);
        assert_eq!(totals.files, 1);
        assert_eq!(totals.latest_mtime, 5);
    }

    #[test]
    fn dot_entry_starts_empty() {
        let totals = Totals::of_node(NodeKind::DotEntry, &metadata(4096, 9));
        assert_eq!(totals, Totals::default());
    }

    #[test]
    fn totals_add_keeps_latest_mtime() {
        let mut dir = Totals::of_node(NodeKind::Directory, &metadata(4096, 10));
        dir.add(&Totals::of_node(NodeKind::File, &metadata(100, 50)));
        dir.add(&Totals::of_node(NodeKind::File, &metadata(100, 20)));
        assert_eq!(dir.size, 4296);
        assert_eq!(dir.items, 3);
        assert_eq!(dir.files, 2);
        assert_eq!(dir.latest_mtime, 50);
    }

    #[test]
    fn persistent_flags_exclude_pending() {
        assert!(!NodeFlags::PERSISTENT.contains(NodeFlags::PENDING_READ));
        assert!(NodeFlags::PERSISTENT.contains(NodeFlags::READ_ERROR));
    }

    #[test]
    fn node_with_children() {
        let mut slab = Slab::new();
        let a = slab.insert(1);
        let b = slab.insert(2);

        let mut node = FileNode::new(None, "src", NodeKind::Directory, metadata(0, 0));
        node.add_child(a);
        node.add_child(b);
        assert_eq!(node.children(), &[a, b]);

        assert!(node.remove_child(a));
        assert!(!node.remove_child(a));
        assert_eq!(node.children(), &[b]);
    }
}
