//! The directory tree and its node arena.

mod dir_tree;
mod file_nodes;

pub use dir_tree::DirTree;
pub use file_nodes::FileNodes;
