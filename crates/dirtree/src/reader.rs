//! Filesystem access used by read jobs.
//!
//! [`DirectoryReader`] is the seam between the tree and the operating system:
//! it stats a single path and lists a directory into [`RawEntry`] records.
//! Implementations must be `Send + Sync` because queued listings may be
//! fetched ahead of time on the rayon pool.

use std::fs;
use std::io;
use std::path::Path;

use crate::storage::NodeMetadata;
use crate::types::{EntryKind, RawEntry};

/// Produces raw directory entries for read jobs.
pub trait DirectoryReader: Send + Sync {
    /// Stats `path` itself without following a final symlink.
    fn stat(&self, path: &Path) -> io::Result<RawEntry>;

    /// Lists the direct entries of the directory at `path`.
    ///
    /// The order of the returned entries becomes the child order in the tree.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<RawEntry>>;
}

/// Reads the local filesystem through `std::fs`.
///
/// Entries are sorted by name so repeated scans of an unchanged directory
/// produce identical trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirReader;

impl DirectoryReader for LocalDirReader {
    fn stat(&self, path: &Path) -> io::Result<RawEntry> {
        let metadata = fs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(RawEntry::new(
            name,
            EntryKind::from(metadata.file_type()),
            NodeMetadata::from_fs_metadata(&metadata),
        ))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<RawEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::debug!("skipping unreadable entry in {}: {}", path.display(), error);
                    continue;
                }
            };
            // DirEntry::metadata does not traverse symlinks.
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::debug!(
                        "skipping {}: cannot stat: {}",
                        entry.path().display(),
                        error
                    );
                    continue;
                }
            };
            entries.push(RawEntry::from_os_name(
                entry.file_name(),
                EntryKind::from(metadata.file_type()),
                NodeMetadata::from_fs_metadata(&metadata),
            ));
        }
        entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory directory reader for tests.

    use std::collections::BTreeMap;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::DirectoryReader;
    use crate::storage::NodeMetadata;
    use crate::types::{EntryKind, RawEntry};

    #[derive(Debug, Clone)]
    enum FakeNode {
        File(NodeMetadata),
        Dir {
            metadata: NodeMetadata,
            denied: bool,
        },
    }

    /// A fake filesystem keyed by absolute path.
    #[derive(Debug, Default)]
    pub struct MemoryReader {
        nodes: Mutex<BTreeMap<PathBuf, FakeNode>>,
        listings: AtomicUsize,
    }

    pub fn file_meta(size: u64, device: u64) -> NodeMetadata {
        NodeMetadata {
            size,
            blocks: size.div_ceil(512),
            mtime: 1_700_000_000,
            links: 1,
            uid: 1000,
            gid: 1000,
            mode: 0o100644,
            device,
        }
    }

    pub fn dir_meta(device: u64) -> NodeMetadata {
        NodeMetadata {
            size: 4096,
            blocks: 8,
            mtime: 1_700_000_000,
            links: 2,
            uid: 1000,
            gid: 1000,
            mode: 0o040755,
            device,
        }
    }

    impl MemoryReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn dir(self, path: &str) -> Self {
            self.dir_on(path, 1)
        }

        pub fn dir_on(self, path: &str, device: u64) -> Self {
            self.nodes.lock().insert(
                PathBuf::from(path),
                FakeNode::Dir {
                    metadata: dir_meta(device),
                    denied: false,
                },
            );
            self
        }

        pub fn denied_dir(self, path: &str) -> Self {
            self.nodes.lock().insert(
                PathBuf::from(path),
                FakeNode::Dir {
                    metadata: dir_meta(1),
                    denied: true,
                },
            );
            self
        }

        pub fn file(self, path: &str, size: u64) -> Self {
            self.nodes
                .lock()
                .insert(PathBuf::from(path), FakeNode::File(file_meta(size, 1)));
            self
        }

        /// Adds or replaces a file after construction.
        pub fn put_file(&self, path: &str, size: u64) {
            self.nodes
                .lock()
                .insert(PathBuf::from(path), FakeNode::File(file_meta(size, 1)));
        }

        /// Removes a path and everything below it.
        pub fn remove(&self, path: &str) {
            let prefix = PathBuf::from(path);
            self.nodes.lock().retain(|p, _| !p.starts_with(&prefix));
        }

        /// Number of `read_dir` calls served so far.
        pub fn listings(&self) -> usize {
            self.listings.load(Ordering::SeqCst)
        }

        fn entry_for(path: &Path, node: &FakeNode) -> RawEntry {
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            match node {
                FakeNode::File(metadata) => RawEntry::new(name, EntryKind::File, *metadata),
                FakeNode::Dir { metadata, .. } => {
                    RawEntry::new(name, EntryKind::Directory, *metadata)
                }
            }
        }
    }

    impl DirectoryReader for MemoryReader {
        fn stat(&self, path: &Path) -> io::Result<RawEntry> {
            let nodes = self.nodes.lock();
            let node = nodes
                .get(path)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            Ok(Self::entry_for(path, node))
        }

        fn read_dir(&self, path: &Path) -> io::Result<Vec<RawEntry>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            let nodes = self.nodes.lock();
            match nodes.get(path) {
                Some(FakeNode::Dir { denied: false, .. }) => {}
                Some(FakeNode::Dir { denied: true, .. }) => {
                    return Err(io::Error::from(io::ErrorKind::PermissionDenied))
                }
                Some(FakeNode::File(_)) => {
                    return Err(io::Error::new(io::ErrorKind::Other, "not a directory"))
                }
                None => return Err(io::Error::from(io::ErrorKind::NotFound)),
            }
            Ok(nodes
                .iter()
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, node)| Self::entry_for(p, node))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn local_reader_lists_sorted_entries() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("zebra.txt")).unwrap();
        File::create(temp.path().join("apple.txt")).unwrap();
        fs::create_dir(temp.path().join("mango")).unwrap();

        let entries = LocalDirReader.read_dir(temp.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_ref()).collect();
        assert_eq!(names, vec!["apple.txt", "mango", "zebra.txt"]);
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[test]
    fn local_reader_stat_reports_size() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        fs::write(&path, vec![0u8; 1234]).unwrap();

        let entry = LocalDirReader.stat(&path).unwrap();
        assert_eq!(entry.name.as_ref(), "data.bin");
        assert_eq!(entry.metadata.size, 1234);
        assert!(!entry.is_dir());
    }

    #[test]
    fn local_reader_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let result = LocalDirReader.read_dir(&temp.path().join("missing"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn memory_reader_lists_direct_children_only() {
        let reader = memory::MemoryReader::new()
            .dir("/r")
            .dir("/r/a")
            .file("/r/a/deep.txt", 3)
            .file("/r/b.txt", 5);
        let names: Vec<_> = reader
            .read_dir(Path::new("/r"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a".into(), "b.txt".into()] as Vec<Box<str>>);
    }
}
