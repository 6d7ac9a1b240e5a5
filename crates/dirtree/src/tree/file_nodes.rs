//! FileNodes - the node arena behind a directory tree.
//!
//! Wraps the generational [`Slab`] together with the pseudo root and keeps
//! the structural invariants: children are owned through their parent's
//! handle list, every node knows its parent, and container totals always
//! cover their whole subtree.

use std::ops::Deref;
use std::path::PathBuf;

use crate::storage::{FileNode, NodeId, NodeKind, NodeMetadata, Slab, Totals, DOT_ENTRY_NAME};

/// Node arena of one directory tree.
#[derive(Debug)]
pub struct FileNodes {
    slab: Slab<FileNode>,
    root: NodeId,
}

impl Default for FileNodes {
    fn default() -> Self {
        Self::new()
    }
}

impl FileNodes {
    /// Creates an arena holding only the pseudo root.
    pub fn new() -> Self {
        let mut slab = Slab::new();
        let root = slab.insert(FileNode::new(
            None,
            "",
            NodeKind::PseudoRoot,
            NodeMetadata::default(),
        ));
        Self { slab, root }
    }

    /// Returns the pseudo root.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the toplevel items in insertion order.
    pub fn toplevels(&self) -> &[NodeId] {
        self.slab[self.root].children()
    }

    pub fn is_toplevel(&self, id: NodeId) -> bool {
        self.slab.get(id).and_then(FileNode::parent) == Some(self.root)
    }

    /// Finds the toplevel item whose name is exactly `name`.
    pub fn toplevel_named(&self, name: &str) -> Option<NodeId> {
        self.toplevels()
            .iter()
            .copied()
            .find(|&id| self.slab[id].name() == name)
    }

    /// Returns the dot entry of a directory, if it has one.
    pub fn dot_entry(&self, dir: NodeId) -> Option<NodeId> {
        self.slab
            .get(dir)?
            .children()
            .iter()
            .copied()
            .find(|&child| self.slab[child].is_dot_entry())
    }

    /// Returns true if `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.slab.get(node).and_then(FileNode::parent);
        }
        false
    }

    /// Returns the nearest enclosing directory of a node, the node itself
    /// included.
    pub fn owning_dir(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.slab.get(node_id)?;
            if node.is_dir() {
                return Some(node_id);
            }
            current = node.parent();
        }
        None
    }

    /// Computes the full path for a node by walking up the parent chain.
    ///
    /// Dot entries are transparent for the nodes below them; the path of a
    /// dot entry itself ends in `<Files>`. Returns `None` for the pseudo
    /// root and stale handles.
    pub fn path_of(&self, id: NodeId) -> Option<PathBuf> {
        let node = self.slab.get(id)?;
        if node.kind() == NodeKind::PseudoRoot {
            return None;
        }

        let mut segments = vec![node.name()];
        let mut current = node.parent();
        while let Some(parent_id) = current {
            let parent = self.slab.get(parent_id)?;
            match parent.kind() {
                NodeKind::PseudoRoot => break,
                NodeKind::DotEntry => {}
                NodeKind::Directory | NodeKind::File => segments.push(parent.name()),
            }
            current = parent.parent();
        }

        Some(segments.into_iter().rev().collect())
    }

    /// Locates a node by its full path.
    ///
    /// Walks from the matching toplevel down one path component at a time,
    /// looking through dot entries. Dot entries themselves are only returned
    /// when `find_dot_entries` is set. This touches every child on the way
    /// and is not meant for hot paths.
    pub fn locate(&self, path: &str, find_dot_entries: bool) -> Option<NodeId> {
        let path = trim_trailing_slashes(path);

        for &top in self.toplevels() {
            let top_name = trim_trailing_slashes(self.slab[top].name());
            let rest = if path == top_name {
                return Some(top);
            } else if top_name == "/" {
                path.strip_prefix('/')
            } else {
                path.strip_prefix(top_name)
                    .and_then(|rest| rest.strip_prefix('/'))
            };
            let Some(rest) = rest else {
                continue;
            };
            if let Some(found) = self.locate_below(top, rest, find_dot_entries) {
                return Some(found);
            }
        }
        None
    }

    fn locate_below(&self, start: NodeId, rest: &str, find_dot_entries: bool) -> Option<NodeId> {
        let mut current = start;
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            current = self.find_child(current, segment, find_dot_entries)?;
        }
        Some(current)
    }

    fn find_child(&self, parent: NodeId, name: &str, find_dot_entries: bool) -> Option<NodeId> {
        let children = self.slab.get(parent)?.children();

        if let Some(&found) = children.iter().find(|&&child| {
            let node = &self.slab[child];
            !node.is_dot_entry() && node.name() == name
        }) {
            return Some(found);
        }

        let dot = children
            .iter()
            .copied()
            .find(|&child| self.slab[child].is_dot_entry())?;
        if name == DOT_ENTRY_NAME {
            return find_dot_entries.then_some(dot);
        }
        self.slab[dot]
            .children()
            .iter()
            .copied()
            .find(|&child| self.slab[child].name() == name)
    }

    /// Returns a node and all its descendants in preorder.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.slab.get(current) else {
                continue;
            };
            result.push(current);
            stack.extend(node.children().iter().rev().copied());
        }
        result
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut FileNode> {
        self.slab.get_mut(id)
    }

    /// Inserts a new child under `parent` and adds its totals to every
    /// ancestor. Returns `None` if `parent` is stale or not a container.
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        name: impl Into<Box<str>>,
        kind: NodeKind,
        metadata: NodeMetadata,
    ) -> Option<NodeId> {
        if !self.slab.get(parent)?.kind().is_container() {
            return None;
        }
        let node = FileNode::new(Some(parent), name, kind, metadata);
        let totals = node.totals;
        let id = self.slab.insert(node);
        self.slab[parent].add_child(id);
        self.add_totals_upwards(parent, &totals);
        Some(id)
    }

    /// Returns the dot entry of `dir`, creating it if needed.
    ///
    /// The boolean is true when the dot entry was just created.
    pub(crate) fn ensure_dot_entry(&mut self, dir: NodeId) -> Option<(NodeId, bool)> {
        if let Some(dot) = self.dot_entry(dir) {
            return Some((dot, false));
        }
        let dot = self.insert_child(dir, DOT_ENTRY_NAME, NodeKind::DotEntry, NodeMetadata::default())?;
        Some((dot, true))
    }

    /// Detaches `id` from its parent and drops it with its whole subtree.
    ///
    /// Ancestor totals are recomputed. Returns the removed handles; empty if
    /// `id` is stale or the pseudo root.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        if id == self.root {
            return Vec::new();
        }
        let Some(parent) = self.slab.get(id).map(FileNode::parent) else {
            return Vec::new();
        };

        let removed = self.subtree(id);
        for &node in &removed {
            self.slab.try_remove(node);
        }
        if let Some(parent) = parent {
            if let Some(parent_node) = self.slab.get_mut(parent) {
                parent_node.remove_child(id);
            }
            self.recompute_upwards(parent);
        }
        removed
    }

    /// Recomputes the totals of `id` from its own metadata and its direct
    /// children.
    pub(crate) fn recompute_totals(&mut self, id: NodeId) {
        let Some(node) = self.slab.get(id) else {
            return;
        };
        let mut totals = Totals::of_node(node.kind(), &node.metadata);
        for &child in node.children() {
            if let Some(child) = self.slab.get(child) {
                totals.add(&child.totals);
            }
        }
        self.slab[id].totals = totals;
    }

    /// Replaces the metadata of `id` and refreshes the totals along the
    /// ancestor chain.
    pub(crate) fn set_metadata(&mut self, id: NodeId, metadata: NodeMetadata) {
        let Some(node) = self.slab.get_mut(id) else {
            return;
        };
        node.metadata = metadata;
        self.recompute_upwards(id);
    }

    fn recompute_upwards(&mut self, from: NodeId) {
        let mut current = Some(from);
        while let Some(id) = current {
            self.recompute_totals(id);
            current = self.slab.get(id).and_then(FileNode::parent);
        }
    }

    fn add_totals_upwards(&mut self, from: NodeId, totals: &Totals) {
        let mut current = Some(from);
        while let Some(id) = current {
            let Some(node) = self.slab.get_mut(id) else {
                break;
            };
            node.totals.add(totals);
            current = node.parent();
        }
    }
}

impl Deref for FileNodes {
    type Target = Slab<FileNode>;

    fn deref(&self) -> &Self::Target {
        &self.slab
    }
}

fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn meta(size: u64) -> NodeMetadata {
        NodeMetadata {
            size,
            blocks: size.div_ceil(512),
            mtime: size as i64,
            ..NodeMetadata::default()
        }
    }

    /// /data
    ///   docs/
    ///     <Files>: readme.md (100)
    ///   <Files>: a.bin (1000), b.bin (24)
    fn sample() -> (FileNodes, NodeId, NodeId, NodeId) {
        let mut nodes = FileNodes::new();
        let root = nodes.root();
        let top = nodes
            .insert_child(root, "/data", NodeKind::Directory, meta(10))
            .unwrap();
        let docs = nodes
            .insert_child(top, "docs", NodeKind::Directory, meta(10))
            .unwrap();
        let (docs_dot, _) = nodes.ensure_dot_entry(docs).unwrap();
        nodes
            .insert_child(docs_dot, "readme.md", NodeKind::File, meta(100))
            .unwrap();
        let (dot, created) = nodes.ensure_dot_entry(top).unwrap();
        assert!(created);
        let a = nodes
            .insert_child(dot, "a.bin", NodeKind::File, meta(1000))
            .unwrap();
        nodes
            .insert_child(dot, "b.bin", NodeKind::File, meta(24))
            .unwrap();
        (nodes, top, docs, a)
    }

    #[test]
    fn totals_accumulate_on_insert() {
        let (nodes, top, docs, _) = sample();
        let totals = nodes[top].totals();
        assert_eq!(totals.size, 10 + 10 + 100 + 1000 + 24);
        assert_eq!(totals.items, 5);
        assert_eq!(totals.files, 3);
        assert_eq!(totals.subdirs, 2);
        assert_eq!(totals.latest_mtime, 1000);
        assert_eq!(nodes[docs].totals().size, 110);
        assert_eq!(nodes[nodes.root()].totals().size, totals.size);
    }

    #[test]
    fn ensure_dot_entry_is_idempotent() {
        let (mut nodes, top, _, _) = sample();
        let dot = nodes.dot_entry(top).unwrap();
        assert_eq!(nodes.ensure_dot_entry(top), Some((dot, false)));
    }

    #[test]
    fn files_cannot_own_children() {
        let (mut nodes, _, _, a) = sample();
        assert!(nodes
            .insert_child(a, "x", NodeKind::File, meta(1))
            .is_none());
    }

    #[test]
    fn path_skips_dot_entries() {
        let (nodes, top, docs, a) = sample();
        assert_eq!(nodes.path_of(a).unwrap(), Path::new("/data/a.bin"));
        assert_eq!(nodes.path_of(docs).unwrap(), Path::new("/data/docs"));
        let dot = nodes.dot_entry(top).unwrap();
        assert_eq!(nodes.path_of(dot).unwrap(), Path::new("/data/<Files>"));
        assert_eq!(nodes.path_of(nodes.root()), None);
    }

    #[test]
    fn locate_exact_paths() {
        let (nodes, top, docs, a) = sample();
        assert_eq!(nodes.locate("/data", false), Some(top));
        assert_eq!(nodes.locate("/data/", false), Some(top));
        assert_eq!(nodes.locate("/data/docs", false), Some(docs));
        assert_eq!(nodes.locate("/data/a.bin", false), Some(a));
        assert!(nodes.locate("/data/docs/readme.md", false).is_some());
        assert_eq!(nodes.locate("/data/missing", false), None);
        assert_eq!(nodes.locate("/data/docs/a.bin", false), None);
        assert_eq!(nodes.locate("/dat", false), None);
        assert_eq!(nodes.locate("/database", false), None);
    }

    #[test]
    fn locate_dot_entries_only_on_request() {
        let (nodes, top, _, _) = sample();
        assert_eq!(nodes.locate("/data/<Files>", false), None);
        assert_eq!(nodes.locate("/data/<Files>", true), nodes.dot_entry(top));
    }

    #[test]
    fn locate_below_filesystem_root_toplevel() {
        let mut nodes = FileNodes::new();
        let root = nodes.root();
        let top = nodes
            .insert_child(root, "/", NodeKind::Directory, meta(0))
            .unwrap();
        let etc = nodes
            .insert_child(top, "etc", NodeKind::Directory, meta(0))
            .unwrap();
        assert_eq!(nodes.locate("/", false), Some(top));
        assert_eq!(nodes.locate("/etc", false), Some(etc));
        assert_eq!(nodes.path_of(etc).unwrap(), Path::new("/etc"));
    }

    #[test]
    fn remove_subtree_updates_ancestors_and_invalidates_handles() {
        let (mut nodes, top, docs, _) = sample();
        let before = nodes.len();
        let removed = nodes.remove_subtree(docs);

        assert_eq!(removed.len(), 3);
        assert_eq!(nodes.len(), before - 3);
        assert!(!nodes.contains(docs));
        assert!(!nodes[top].children().contains(&docs));
        assert_eq!(nodes[top].totals().size, 10 + 1000 + 24);
        assert_eq!(nodes[top].totals().subdirs, 1);
    }

    #[test]
    fn remove_root_is_refused() {
        let (mut nodes, _, _, _) = sample();
        let root = nodes.root();
        assert!(nodes.remove_subtree(root).is_empty());
        assert!(nodes.contains(root));
    }

    #[test]
    fn subtree_is_preorder() {
        let (nodes, top, docs, _) = sample();
        let order = nodes.subtree(top);
        assert_eq!(order[0], top);
        assert_eq!(order[1], docs);
        assert_eq!(order.len(), 7);
    }

    #[test]
    fn owning_dir_of_file_is_directory_above_dot_entry() {
        let (nodes, top, _, a) = sample();
        assert_eq!(nodes.owning_dir(a), Some(top));
        assert_eq!(nodes.owning_dir(top), Some(top));
        assert!(nodes.is_ancestor_or_self(top, a));
        assert!(!nodes.is_ancestor_or_self(a, top));
    }
}
