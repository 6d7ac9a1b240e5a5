//! Cache reading.
//!
//! The whole file is decoded and validated before anything touches a tree:
//! a truncated, corrupt or foreign file yields an error and no entries.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::records::{CacheRecord, CachedEntry, CachedKind, EntryRecord, CACHE_MAGIC, CACHE_VERSION};
use crate::error::{DirTreeError, Result};

const SCRATCH_SIZE: usize = 64 * 1024;

/// Decodes a cache file into its toplevel entries.
pub fn read_cache_file(path: &Path) -> Result<Vec<CachedEntry>> {
    let input = File::open(path)?;
    let decoder = zstd::Decoder::new(input).map_err(|error| {
        DirTreeError::CacheDecode(format!("failed to create zstd decoder: {error}"))
    })?;
    let mut input = BufReader::new(decoder);
    let mut scratch = vec![0u8; SCRATCH_SIZE];

    let _span = tracing::info_span!("cache_decode", path = %path.display()).entered();
    let mut next = || -> Result<CacheRecord> {
        match postcard::from_io((&mut input, &mut scratch)) {
            Ok((record, _)) => Ok(record),
            Err(error) => Err(DirTreeError::CacheDecode(format!(
                "truncated or corrupt record: {error}"
            ))),
        }
    };

    match next()? {
        CacheRecord::Header { magic, version } => {
            if magic != CACHE_MAGIC {
                return Err(DirTreeError::CacheDecode("not a dirtree cache file".into()));
            }
            if version != CACHE_VERSION {
                return Err(DirTreeError::CacheDecode(format!(
                    "unsupported cache version {version}, expected {CACHE_VERSION}"
                )));
            }
        }
        other => {
            return Err(DirTreeError::CacheDecode(format!(
                "expected header, found {other:?}"
            )))
        }
    }

    let mut builder = EntryBuilder::default();
    loop {
        match next()? {
            CacheRecord::Dir(record) => builder.open_dir(record)?,
            CacheRecord::File(record) => builder.add_file(record)?,
            CacheRecord::EndDir => builder.close_dir()?,
            CacheRecord::End => break,
            CacheRecord::Header { .. } => {
                return Err(DirTreeError::CacheDecode("unexpected second header".into()))
            }
        }
    }
    let toplevels = builder.finish()?;

    tracing::debug!(
        "decoded cache {} ({} toplevels, {} nodes)",
        path.display(),
        toplevels.len(),
        toplevels.iter().map(CachedEntry::count).sum::<usize>()
    );
    Ok(toplevels)
}

/// Assembles the nested entries from the flat record stream.
#[derive(Default)]
struct EntryBuilder {
    toplevels: Vec<CachedEntry>,
    open: Vec<CachedEntry>,
}

impl EntryBuilder {
    fn check_name(&self, record: &EntryRecord) -> Result<()> {
        if record.name.is_empty() {
            return Err(DirTreeError::CacheDecode("entry with empty name".into()));
        }
        if !self.open.is_empty() && record.name.contains('/') {
            return Err(DirTreeError::CacheDecode(format!(
                "nested entry name {:?} contains a path separator",
                record.name
            )));
        }
        Ok(())
    }

    fn open_dir(&mut self, record: EntryRecord) -> Result<()> {
        self.check_name(&record)?;
        self.open.push(CachedEntry::new(CachedKind::Dir, record));
        Ok(())
    }

    fn add_file(&mut self, record: EntryRecord) -> Result<()> {
        self.check_name(&record)?;
        self.attach(CachedEntry::new(CachedKind::File, record));
        Ok(())
    }

    fn close_dir(&mut self) -> Result<()> {
        let dir = self
            .open
            .pop()
            .ok_or_else(|| DirTreeError::CacheDecode("unbalanced directory end".into()))?;
        self.attach(dir);
        Ok(())
    }

    fn attach(&mut self, entry: CachedEntry) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(entry),
            None => self.toplevels.push(entry),
        }
    }

    fn finish(self) -> Result<Vec<CachedEntry>> {
        if !self.open.is_empty() {
            return Err(DirTreeError::CacheDecode(format!(
                "{} directories not closed before end of cache",
                self.open.len()
            )));
        }
        Ok(self.toplevels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn record(name: &str) -> EntryRecord {
        EntryRecord {
            name: name.into(),
            size: 10,
            blocks: 1,
            mtime: 1,
            links: 1,
            uid: 0,
            gid: 0,
            mode: 0o644,
            device: 1,
            flags: 0,
        }
    }

    fn write_raw(path: &Path, records: &[CacheRecord]) {
        let file = File::create(path).unwrap();
        let mut encoder = zstd::Encoder::new(file, 3).unwrap();
        for record in records {
            let bytes = postcard::to_stdvec(record).unwrap();
            encoder.write_all(&bytes).unwrap();
        }
        encoder.finish().unwrap();
    }

    fn header() -> CacheRecord {
        CacheRecord::Header {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
        }
    }

    #[test]
    fn nested_records_become_nested_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        write_raw(
            &path,
            &[
                header(),
                CacheRecord::Dir(record("/top")),
                CacheRecord::File(record("a.txt")),
                CacheRecord::Dir(record("sub")),
                CacheRecord::EndDir,
                CacheRecord::EndDir,
                CacheRecord::File(record("/single.txt")),
                CacheRecord::End,
            ],
        );

        let tops = read_cache_file(&path).unwrap();
        assert_eq!(tops.len(), 2);
        assert_eq!(tops[0].record.name, "/top");
        assert_eq!(tops[0].children.len(), 2);
        assert_eq!(tops[0].children[1].kind, CachedKind::Dir);
        assert_eq!(tops[1].kind, CachedKind::File);
    }

    #[test]
    fn unbalanced_input_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        write_raw(
            &path,
            &[header(), CacheRecord::Dir(record("/top")), CacheRecord::End],
        );
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));

        write_raw(&path, &[header(), CacheRecord::EndDir, CacheRecord::End]);
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        write_raw(
            &path,
            &[
                CacheRecord::Header {
                    magic: CACHE_MAGIC,
                    version: CACHE_VERSION + 1,
                },
                CacheRecord::End,
            ],
        );
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));
    }

    #[test]
    fn nested_names_must_be_components() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        write_raw(
            &path,
            &[
                header(),
                CacheRecord::Dir(record("/top")),
                CacheRecord::File(record("a/b")),
                CacheRecord::EndDir,
                CacheRecord::End,
            ],
        );
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));
    }

    #[test]
    fn missing_end_record_is_truncation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        write_raw(
            &path,
            &[
                header(),
                CacheRecord::Dir(record("/top")),
                CacheRecord::EndDir,
            ],
        );
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            read_cache_file(&temp.path().join("absent.cache")),
            Err(DirTreeError::Io(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.cache");
        std::fs::write(&path, b"definitely not a zstd stream").unwrap();
        assert!(matches!(
            read_cache_file(&path),
            Err(DirTreeError::CacheDecode(_))
        ));
    }
}
