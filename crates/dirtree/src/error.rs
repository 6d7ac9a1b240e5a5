use std::path::PathBuf;

use crate::storage::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum DirTreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Node {0:?} does not belong to this tree")]
    InvalidNode(NodeId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Directory tree is busy reading")]
    Busy,

    #[error("Cache encode error: {0}")]
    CacheEncode(String),

    #[error("Cache decode error: {0}")]
    CacheDecode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DirTreeError>;
