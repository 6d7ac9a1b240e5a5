//! Directory entry records and scan statistics.
//!
//! [`RawEntry`] is what a [`crate::reader::DirectoryReader`] hands back for
//! every entry of a listed directory; read jobs turn these into tree nodes.

use std::ffi::OsString;

use serde::{Deserialize, Serialize};

use crate::storage::NodeMetadata;

/// Entry classification as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs, device nodes.
    Special,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Special => "special",
        }
    }
}

impl From<std::fs::FileType> for EntryKind {
    fn from(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        }
    }
}

/// One directory entry produced by a directory reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// The entry name (a single path component), lossily converted for
    /// display and lookup.
    pub name: Box<str>,
    /// The name exactly as the filesystem reported it; used to build the
    /// paths of subdirectories.
    pub os_name: OsString,
    pub kind: EntryKind,
    pub metadata: NodeMetadata,
}

impl RawEntry {
    pub fn new(name: impl Into<Box<str>>, kind: EntryKind, metadata: NodeMetadata) -> Self {
        let name = name.into();
        Self {
            os_name: OsString::from(&*name),
            name,
            kind,
            metadata,
        }
    }

    /// Creates an entry from a raw filesystem name, which need not be
    /// valid UTF-8.
    pub fn from_os_name(os_name: OsString, kind: EntryKind, metadata: NodeMetadata) -> Self {
        Self {
            name: os_name.to_string_lossy().into(),
            os_name,
            kind,
            metadata,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Counters for the current read cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Directories whose listing was integrated.
    pub dirs_read: usize,
    /// Non-directory entries added.
    pub files_seen: usize,
    /// Directories that could not be listed.
    pub read_errors: usize,
    /// Jobs that retired because their target was gone.
    pub canceled_jobs: usize,
}
