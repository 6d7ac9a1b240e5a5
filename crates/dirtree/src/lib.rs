//! In-memory directory tree library.
//!
//! This crate builds and maintains a tree of directories and files:
//! - Generational arena storage with cumulative subtree totals
//! - Queued, abortable directory reads with optional parallel prefetch
//! - Ordered change notifications for observers and subscribers
//! - Compressed on-disk cache that can replace a live scan

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod reader;
pub mod storage;
pub mod tree;
pub mod types;

// Re-export main types
pub use cancel::{AbortHandle, CancellationToken};
pub use config::{ExcludeRules, ScanOptions};
pub use error::{DirTreeError, Result};
pub use notify::{EventLog, NotificationHub, TreeEvent, TreeObserver};
pub use reader::{DirectoryReader, LocalDirReader};
pub use storage::{FileNode, NodeFlags, NodeId, NodeKind, NodeMetadata, Totals};
pub use tree::{DirTree, FileNodes};
pub use types::{EntryKind, RawEntry, ScanStats};
