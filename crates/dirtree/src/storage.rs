//! Storage layer for the directory tree.
//!
//! - Generational slab allocator addressing nodes by [`NodeId`]
//! - Node types with metadata, flags and subtree totals

mod entry;
mod index_types;
mod node;
mod slab;

pub use index_types::NodeId;
pub use node::{FileNode, NodeFlags, NodeKind, NodeMetadata, Totals, DOT_ENTRY_NAME};
pub use slab::{Slab, SlabIter};
