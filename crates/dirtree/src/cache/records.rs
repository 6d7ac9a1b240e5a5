//! Cache file records.
//!
//! A cache file is a zstd-compressed sequence of postcard-encoded
//! [`CacheRecord`]s:
//!
//! ```text
//! Header { magic, version }
//! Dir("/home/me") File("notes.txt") Dir("src") File("main.rs") EndDir EndDir
//! ...more toplevels...
//! End
//! ```
//!
//! Toplevel records carry full paths, nested records single path components.
//! Dot entries are not stored; their files appear as `File` records of the
//! owning directory at the dot entry's position.

use serde::{Deserialize, Serialize};

use crate::storage::{FileNode, NodeFlags, NodeMetadata};

/// Magic bytes opening every cache file.
pub const CACHE_MAGIC: [u8; 8] = *b"DIRTREE\0";

/// Cache format version - increment when changing the format.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheRecord {
    Header { magic: [u8; 8], version: u32 },
    /// Opens a directory; its children follow until the matching `EndDir`.
    Dir(EntryRecord),
    File(EntryRecord),
    EndDir,
    End,
}

/// Name, metadata and persistent flags of one cached node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    pub size: u64,
    pub blocks: u64,
    pub mtime: i64,
    pub links: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub device: u64,
    pub flags: u8,
}

impl EntryRecord {
    pub fn from_node(name: impl Into<String>, node: &FileNode) -> Self {
        let meta = &node.metadata;
        Self {
            name: name.into(),
            size: meta.size,
            blocks: meta.blocks,
            mtime: meta.mtime,
            links: meta.links,
            uid: meta.uid,
            gid: meta.gid,
            mode: meta.mode,
            device: meta.device,
            flags: (node.flags & NodeFlags::PERSISTENT).bits(),
        }
    }

    pub fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            size: self.size,
            blocks: self.blocks,
            mtime: self.mtime,
            links: self.links,
            uid: self.uid,
            gid: self.gid,
            mode: self.mode,
            device: self.device,
        }
    }

    /// Stored flags; anything outside the persistent set is dropped.
    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags) & NodeFlags::PERSISTENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedKind {
    Dir,
    File,
}

/// A decoded cache entry with its nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub kind: CachedKind,
    pub record: EntryRecord,
    /// Children in stored order (always empty for files).
    pub children: Vec<CachedEntry>,
}

impl CachedEntry {
    pub fn new(kind: CachedKind, record: EntryRecord) -> Self {
        Self {
            kind,
            record,
            children: Vec::new(),
        }
    }

    /// Number of entries in this subtree, the entry itself included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(CachedEntry::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeKind;

    #[test]
    fn transient_flags_are_not_stored() {
        let mut node = FileNode::new(
            None,
            "src",
            NodeKind::Directory,
            NodeMetadata {
                size: 4096,
                device: 7,
                ..NodeMetadata::default()
            },
        );
        node.flags = NodeFlags::PENDING_READ | NodeFlags::MOUNT_POINT;

        let record = EntryRecord::from_node("src", &node);
        assert_eq!(record.flags(), NodeFlags::MOUNT_POINT);
        assert_eq!(record.metadata(), node.metadata);
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let record = EntryRecord {
            name: "x".into(),
            size: 0,
            blocks: 0,
            mtime: 0,
            links: 1,
            uid: 0,
            gid: 0,
            mode: 0,
            device: 0,
            flags: 0xff,
        };
        assert_eq!(record.flags(), NodeFlags::PERSISTENT);
    }

    #[test]
    fn count_includes_nested_entries() {
        let record = |name: &str| EntryRecord {
            name: name.into(),
            size: 0,
            blocks: 0,
            mtime: 0,
            links: 1,
            uid: 0,
            gid: 0,
            mode: 0,
            device: 0,
            flags: 0,
        };
        let mut dir = CachedEntry::new(CachedKind::Dir, record("/top"));
        let mut sub = CachedEntry::new(CachedKind::Dir, record("sub"));
        sub.children.push(CachedEntry::new(CachedKind::File, record("a")));
        dir.children.push(sub);
        dir.children.push(CachedEntry::new(CachedKind::File, record("b")));
        assert_eq!(dir.count(), 4);
    }
}
