//! Cache writing.
//!
//! Streams the records of one or more subtrees through postcard into a zstd
//! encoder. Compression runs single-threaded at a fixed level so an
//! unchanged tree always produces the same bytes. The file is written to a
//! temporary sibling first and renamed into place.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::records::{CacheRecord, EntryRecord, CACHE_MAGIC, CACHE_VERSION};
use crate::error::{DirTreeError, Result};
use crate::storage::{NodeId, NodeKind};
use crate::tree::FileNodes;

const ZSTD_LEVEL: i32 = 6;

enum Step {
    Enter(NodeId),
    EndDir,
}

/// Writes the subtrees rooted at `tops` to `path`.
///
/// Each top node is stored under its full path. Returns the number of node
/// records written.
pub fn write_cache_file(nodes: &FileNodes, tops: &[NodeId], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| {
            DirTreeError::Internal(format!(
                "failed to create cache directory {}: {error}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    let written = match write_records(nodes, tops, &tmp_path) {
        Ok(written) => written,
        Err(error) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(error);
        }
    };

    fs::rename(&tmp_path, path).map_err(|error| {
        DirTreeError::Internal(format!(
            "failed to finalize cache file {}: {error}",
            path.display()
        ))
    })?;

    tracing::debug!("wrote cache to {} ({} nodes)", path.display(), written);
    Ok(written)
}

fn write_records(nodes: &FileNodes, tops: &[NodeId], tmp_path: &Path) -> Result<usize> {
    let output = File::create(tmp_path).map_err(|error| {
        DirTreeError::Internal(format!(
            "failed to create cache file {}: {error}",
            tmp_path.display()
        ))
    })?;
    let encoder = zstd::Encoder::new(output, ZSTD_LEVEL).map_err(|error| {
        DirTreeError::CacheEncode(format!("failed to create zstd encoder: {error}"))
    })?;
    let mut output = BufWriter::new(encoder);

    put(
        &mut output,
        &CacheRecord::Header {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
        },
    )?;

    let mut written = 0;
    for &top in tops {
        let full_path = nodes
            .path_of(top)
            .ok_or(DirTreeError::InvalidNode(top))?
            .to_string_lossy()
            .into_owned();
        written += write_subtree(&mut output, nodes, top, full_path)?;
    }
    put(&mut output, &CacheRecord::End)?;

    output.flush()?;
    let encoder = output
        .into_inner()
        .map_err(|error| DirTreeError::CacheEncode(format!("failed to flush cache: {error}")))?;
    let file = encoder
        .finish()
        .map_err(|error| DirTreeError::CacheEncode(format!("failed to finish zstd: {error}")))?;
    file.sync_all()?;
    Ok(written)
}

/// Writes one subtree; `top_name` replaces the name of its first record.
fn write_subtree<W: Write>(
    output: &mut W,
    nodes: &FileNodes,
    top: NodeId,
    top_name: String,
) -> Result<usize> {
    let mut written = 0;
    let mut top_name = Some(top_name);
    let mut stack = vec![Step::Enter(top)];

    while let Some(step) = stack.pop() {
        let id = match step {
            Step::Enter(id) => id,
            Step::EndDir => {
                put(output, &CacheRecord::EndDir)?;
                continue;
            }
        };
        let node = nodes.get(id).ok_or(DirTreeError::InvalidNode(id))?;
        let name = top_name.take().unwrap_or_else(|| node.name().to_owned());
        let record = EntryRecord::from_node(name, node);

        match node.kind() {
            NodeKind::File => put(output, &CacheRecord::File(record))?,
            NodeKind::Directory => {
                put(output, &CacheRecord::Dir(record))?;
                stack.push(Step::EndDir);
                for &child in node.children().iter().rev() {
                    match nodes.get(child) {
                        Some(child_node) if child_node.is_dot_entry() => stack.extend(
                            child_node.children().iter().rev().map(|&f| Step::Enter(f)),
                        ),
                        Some(_) => stack.push(Step::Enter(child)),
                        None => {}
                    }
                }
            }
            NodeKind::DotEntry | NodeKind::PseudoRoot => {
                return Err(DirTreeError::InvalidInput(format!(
                    "cannot write {:?} node {:?} as a cache entry",
                    node.kind(),
                    id
                )));
            }
        }
        written += 1;
    }
    Ok(written)
}

fn put<W: Write>(output: &mut W, record: &CacheRecord) -> Result<()> {
    postcard::to_io(record, output).map_err(|error| {
        DirTreeError::CacheEncode(format!("failed to encode cache record: {error}"))
    })?;
    Ok(())
}
