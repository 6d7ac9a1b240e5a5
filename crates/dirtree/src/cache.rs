//! On-disk tree cache.
//!
//! A cache file holds one or more subtrees as a flat record stream and can
//! stand in for a live scan: [`crate::DirTree::read_cache`] replays it through
//! the same read-job pipeline, producing the same notifications.

mod reader;
mod records;
mod writer;

pub use reader::read_cache_file;
pub use records::{CacheRecord, CachedEntry, CachedKind, EntryRecord, CACHE_MAGIC, CACHE_VERSION};
pub use writer::write_cache_file;
