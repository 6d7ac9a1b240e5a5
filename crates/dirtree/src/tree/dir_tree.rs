//! DirTree - an in-memory directory tree filled by queued read jobs.
//!
//! The tree owns the node arena, the job queue and the notification hub.
//! Nothing happens in the background: the owning thread pumps the queue with
//! [`DirTree::run_next`] or [`DirTree::run_until_idle`], and every mutation is
//! announced to observers on that thread. A read cycle starts with
//! `StartingReading` and ends with exactly one `Finished` or `Aborted`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHashSet;
use tokio::sync::broadcast;

use super::file_nodes::FileNodes;
use crate::cache::{self, CachedEntry, CachedKind};
use crate::cancel::{AbortHandle, CancellationToken};
use crate::config::{ExcludeRules, ScanOptions};
use crate::error::{DirTreeError, Result};
use crate::jobs::{
    finalize_dir, mark_not_descended, replays_children, Enqueued, JobContext, JobState, ReadJob,
    ReadJobQueue,
};
use crate::notify::{NotificationHub, TreeEvent, TreeObserver};
use crate::reader::{DirectoryReader, LocalDirReader};
use crate::storage::{FileNode, NodeFlags, NodeId, NodeKind, NodeMetadata};
use crate::types::ScanStats;

/// Flags that describe the outcome of a previous read and are dropped when a
/// directory is read again.
const READ_OUTCOME: NodeFlags = NodeFlags::EXCLUDED
    .union(NodeFlags::NOT_DESCENDED)
    .union(NodeFlags::READ_ERROR)
    .union(NodeFlags::ABORTED);

pub struct DirTree {
    nodes: FileNodes,
    hub: NotificationHub,
    queue: ReadJobQueue,
    reader: Arc<dyn DirectoryReader>,
    options: ScanOptions,
    excludes: ExcludeRules,
    abort: AbortHandle,
    cancel: CancellationToken,
    selection: Option<NodeId>,
    /// Set from the first `StartingReading` of a cycle until its
    /// `Finished` or `Aborted`.
    cycle_active: bool,
    stats: ScanStats,
    last_progress: Option<Instant>,
}

impl Default for DirTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DirTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirTree")
            .field("nodes", &self.nodes.len())
            .field("queued", &self.queue.len())
            .field("selection", &self.selection)
            .field("options", &self.options)
            .finish()
    }
}

impl DirTree {
    /// Creates an empty tree reading the local filesystem with default
    /// options.
    pub fn new() -> Self {
        Self::build(
            Arc::new(LocalDirReader),
            ScanOptions::default(),
            ExcludeRules::default(),
        )
    }

    pub fn with_options(options: ScanOptions) -> Result<Self> {
        Self::with_reader(options, Arc::new(LocalDirReader))
    }

    /// Creates an empty tree that lists directories through `reader`.
    pub fn with_reader(options: ScanOptions, reader: Arc<dyn DirectoryReader>) -> Result<Self> {
        let excludes = ExcludeRules::new(options.exclude_patterns.as_slice())?;
        Ok(Self::build(reader, options, excludes))
    }

    fn build(reader: Arc<dyn DirectoryReader>, options: ScanOptions, excludes: ExcludeRules) -> Self {
        let abort = AbortHandle::new();
        let cancel = abort.token();
        Self {
            nodes: FileNodes::new(),
            hub: NotificationHub::default(),
            queue: ReadJobQueue::new(),
            reader,
            options,
            excludes,
            abort,
            cancel,
            selection: None,
            cycle_active: false,
            stats: ScanStats::default(),
            last_progress: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn nodes(&self) -> &FileNodes {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&FileNode> {
        self.nodes.get(id)
    }

    /// Returns the invisible pseudo root.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.nodes.root()
    }

    pub fn first_toplevel(&self) -> Option<NodeId> {
        self.nodes.toplevels().first().copied()
    }

    pub fn toplevels(&self) -> &[NodeId] {
        self.nodes.toplevels()
    }

    pub fn is_toplevel(&self, id: NodeId) -> bool {
        self.nodes.is_toplevel(id)
    }

    pub fn path_of(&self, id: NodeId) -> Option<PathBuf> {
        self.nodes.path_of(id)
    }

    /// Finds the node with the given full path. Dot entries are only
    /// returned if `find_dot_entries` is set.
    pub fn locate(&self, path: &str, find_dot_entries: bool) -> Option<NodeId> {
        self.nodes.locate(path, find_dot_entries)
    }

    #[inline]
    pub fn selection(&self) -> Option<NodeId> {
        self.selection
    }

    /// Returns true while read jobs are queued.
    #[inline]
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Counters of the current, or most recent, read cycle.
    #[inline]
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn cross_filesystems(&self) -> bool {
        self.options.cross_filesystems
    }

    /// Takes effect for jobs enqueued from now on. Disabling it also leaves
    /// already deferred mount points unread.
    pub fn set_cross_filesystems(&mut self, cross: bool) {
        self.options.cross_filesystems = cross;
    }

    /// Returns a handle that aborts the running cycle from any thread. The
    /// abort is carried out by the next `run_next` call.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn add_observer(&mut self, observer: impl TreeObserver + 'static) {
        self.hub.add_observer(Box::new(observer));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.hub.subscribe()
    }

    fn emit(&mut self, event: TreeEvent) {
        self.hub.emit(&self.nodes, event);
    }

    // -----------------------------------------------------------------------
    // Read cycle
    // -----------------------------------------------------------------------

    /// Starts reading `path` as a toplevel item, replacing a toplevel with
    /// the same path.
    ///
    /// A path that cannot be accessed still becomes a toplevel item, flagged
    /// `READ_ERROR`.
    pub fn start_reading(&mut self, path: impl AsRef<Path>) -> Result<NodeId> {
        let name = toplevel_name(path.as_ref());
        if name.is_empty() {
            return Err(DirTreeError::InvalidInput("empty path".into()));
        }
        tracing::info!("start reading {}", name);

        self.begin_cycle();
        if let Some(existing) = self.nodes.toplevel_named(&name) {
            self.delete_nodes(&[existing]);
        }
        let id = self.add_toplevel(name)?;
        self.finish_cycle_if_idle();
        Ok(id)
    }

    /// Aborts the running read cycle. Queued jobs are discarded and their
    /// directories flagged `ABORTED`; `Aborted` is emitted. Does nothing
    /// while idle.
    pub fn abort_reading(&mut self) {
        if !self.is_busy() {
            return;
        }
        self.abort.abort();
        self.handle_abort();
    }

    /// Runs the next queued job. Returns false once there is nothing left
    /// to do.
    pub fn run_next(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        if self.cancel.is_cancelled() {
            self.handle_abort();
            return false;
        }

        if self.options.parallel_reads > 1 {
            self.queue
                .prefetch(&*self.reader, &self.cancel, self.options.parallel_reads);
        }
        let Some(job) = self.queue.pop() else {
            return false;
        };
        if job.crosses_filesystem() && !self.options.cross_filesystems {
            tracing::debug!("not descending into {}", job.path().display());
            mark_not_descended(&mut self.nodes, job.target());
            finalize_dir(&mut self.nodes, &mut self.hub, job.target());
            self.finish_cycle_if_idle();
            return true;
        }
        self.report_progress(job.path());

        let mut ctx = JobContext {
            nodes: &mut self.nodes,
            hub: &mut self.hub,
            queue: &mut self.queue,
            reader: &*self.reader,
            excludes: &self.excludes,
            cross_filesystems: self.options.cross_filesystems,
            cancel: &self.cancel,
            stats: &mut self.stats,
        };
        let state = job.run(&mut ctx);

        if state == JobState::Canceled && self.cancel.is_cancelled() {
            self.handle_abort();
            return false;
        }
        self.finish_cycle_if_idle();
        true
    }

    /// Runs jobs until the queue is empty or the cycle is aborted.
    pub fn run_until_idle(&mut self) {
        while self.run_next() {}
    }

    fn begin_cycle(&mut self) {
        if self.cycle_active && self.cancel.is_cancelled() {
            self.handle_abort();
        }
        if !self.cycle_active {
            self.cycle_active = true;
            self.cancel = self.abort.token();
            self.stats = ScanStats::default();
            self.last_progress = None;
        }
        self.emit(TreeEvent::StartingReading);
    }

    fn finish_cycle_if_idle(&mut self) {
        if !self.cycle_active || !self.queue.is_empty() {
            return;
        }
        self.cycle_active = false;
        tracing::info!(
            "reading finished: {} directories, {} files, {} errors",
            self.stats.dirs_read,
            self.stats.files_seen,
            self.stats.read_errors
        );
        self.emit(TreeEvent::Finished);
    }

    fn handle_abort(&mut self) {
        let discarded = self.queue.clear();
        for &id in &discarded {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flags.remove(NodeFlags::PENDING_READ);
                node.flags.insert(NodeFlags::ABORTED);
            }
        }
        self.stats.canceled_jobs += discarded.len();
        tracing::info!("reading aborted, {} queued directories discarded", discarded.len());
        if self.cycle_active {
            self.cycle_active = false;
            self.emit(TreeEvent::Aborted);
        }
    }

    fn report_progress(&mut self, path: &Path) {
        let interval = Duration::from_millis(self.options.progress_interval_ms);
        let now = Instant::now();
        if self
            .last_progress
            .is_some_and(|last| now.duration_since(last) < interval)
        {
            return;
        }
        self.last_progress = Some(now);
        self.emit(TreeEvent::ProgressInfo(format!("Reading {}", path.display())));
    }

    /// Creates a toplevel item for `name` and queues its read job.
    fn add_toplevel(&mut self, name: String) -> Result<NodeId> {
        let path = PathBuf::from(&name);
        let root = self.nodes.root();

        let (kind, metadata, error) = match self.reader.stat(&path) {
            Ok(entry) if entry.is_dir() => (NodeKind::Directory, entry.metadata, None),
            Ok(entry) => (NodeKind::File, entry.metadata, None),
            Err(error) => (NodeKind::Directory, NodeMetadata::default(), Some(error)),
        };
        let id = self
            .nodes
            .insert_child(root, name, kind, metadata)
            .ok_or_else(|| DirTreeError::Internal("pseudo root rejected a toplevel".into()))?;

        if let Some(error) = error {
            tracing::warn!("cannot read {}: {}", path.display(), error);
            self.set_flags(id, NodeFlags::READ_ERROR, NodeFlags::empty());
            self.stats.read_errors += 1;
            self.emit(TreeEvent::ChildAdded(id));
            finalize_dir(&mut self.nodes, &mut self.hub, id);
            return Ok(id);
        }

        if kind == NodeKind::Directory {
            self.set_flags(id, NodeFlags::PENDING_READ, NodeFlags::empty());
            self.queue.enqueue(
                ReadJob::local(id, path, false),
                self.options.cross_filesystems,
            );
        } else {
            self.stats.files_seen += 1;
        }
        self.emit(TreeEvent::ChildAdded(id));
        Ok(id)
    }

    fn set_flags(&mut self, id: NodeId, insert: NodeFlags, remove: NodeFlags) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.flags.remove(remove);
            node.flags.insert(insert);
        }
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Re-reads a subtree from disk, or every toplevel item for `None`.
    ///
    /// Files and dot entries refresh their owning directory. The old
    /// children are dropped with a single `ChildDeleted`.
    pub fn refresh(&mut self, subtree: Option<NodeId>) -> Result<()> {
        let Some(id) = subtree else {
            return self.refresh_all();
        };
        let node = self.nodes.get(id).ok_or(DirTreeError::InvalidNode(id))?;
        if node.kind() == NodeKind::PseudoRoot {
            return self.refresh_all();
        }

        let Some(dir) = self.nodes.owning_dir(id) else {
            // A file toplevel has no directory to re-read.
            let name = node.name().to_owned();
            self.begin_cycle();
            self.delete_nodes(&[id]);
            self.add_toplevel(name)?;
            self.finish_cycle_if_idle();
            return Ok(());
        };
        let path = self.nodes.path_of(dir).ok_or(DirTreeError::InvalidNode(dir))?;
        tracing::debug!("refreshing {}", path.display());

        let children = self.nodes[dir].children().to_vec();
        self.delete_nodes(&children);
        let mut pending = FnvHashSet::default();
        pending.insert(dir);
        self.queue.purge(&pending);

        self.set_flags(dir, NodeFlags::PENDING_READ, READ_OUTCOME);
        if let Ok(entry) = self.reader.stat(&path) {
            self.nodes.set_metadata(dir, entry.metadata);
        }

        let crosses = self.crosses_filesystem(dir);
        self.begin_cycle();
        let job = ReadJob::local(dir, path, crosses);
        if self.queue.enqueue(job, self.options.cross_filesystems) == Enqueued::Dropped {
            mark_not_descended(&mut self.nodes, dir);
            finalize_dir(&mut self.nodes, &mut self.hub, dir);
            self.finish_cycle_if_idle();
        }
        Ok(())
    }

    /// Returns true if `dir` lives on another device than its parent
    /// directory. Toplevel items never cross.
    fn crosses_filesystem(&self, dir: NodeId) -> bool {
        let Some(node) = self.nodes.get(dir) else {
            return false;
        };
        node.parent()
            .and_then(|parent| self.nodes.get(parent))
            .filter(|parent| parent.kind() == NodeKind::Directory)
            .is_some_and(|parent| parent.metadata.device != node.metadata.device)
    }

    fn refresh_all(&mut self) -> Result<()> {
        let toplevels = self.nodes.toplevels().to_vec();
        if toplevels.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = toplevels
            .iter()
            .map(|&id| self.nodes[id].name().to_owned())
            .collect();

        self.delete_nodes(&toplevels);
        self.queue.clear();
        self.begin_cycle();
        for name in names {
            self.add_toplevel(name)?;
        }
        self.finish_cycle_if_idle();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection and deletion
    // -----------------------------------------------------------------------

    /// Sets or clears the current selection.
    pub fn select_item(&mut self, item: Option<NodeId>) -> Result<()> {
        if let Some(id) = item {
            if !self.nodes.contains(id) {
                return Err(DirTreeError::InvalidNode(id));
            }
        }
        self.selection = item;
        self.emit(TreeEvent::SelectionChanged(item));
        Ok(())
    }

    /// Removes a node with its whole subtree.
    ///
    /// A dot entry losing its last file is removed with it. Queued jobs for
    /// removed directories are dropped.
    pub fn delete_subtree(&mut self, id: NodeId) -> Result<()> {
        if id == self.nodes.root() {
            return Err(DirTreeError::InvalidInput("cannot delete the root".into()));
        }
        let node = self.nodes.get(id).ok_or(DirTreeError::InvalidNode(id))?;

        let emptied_dot = node.parent().filter(|&parent| {
            let parent = &self.nodes[parent];
            parent.is_dot_entry() && parent.children().len() == 1
        });

        self.clear_selection_within(&[emptied_dot.unwrap_or(id)]);
        self.emit(TreeEvent::DeletingChild(id));
        if let Some(dot) = emptied_dot {
            self.emit(TreeEvent::DeletingChild(dot));
        }

        let removed = self.nodes.remove_subtree(emptied_dot.unwrap_or(id));
        tracing::debug!("deleted {} nodes", removed.len());
        self.emit(TreeEvent::ChildDeleted);

        let removed: FnvHashSet<NodeId> = removed.into_iter().collect();
        if self.queue.purge(&removed) > 0 {
            self.finish_cycle_if_idle();
        }
        Ok(())
    }

    /// Aborts reading and removes every toplevel item.
    pub fn clear(&mut self) {
        self.abort_reading();
        if self.selection.take().is_some() {
            self.emit(TreeEvent::SelectionChanged(None));
        }
        let toplevels = self.nodes.toplevels().to_vec();
        self.delete_nodes(&toplevels);
    }

    /// Deletes sibling subtrees as one logical operation: one
    /// `DeletingChild` per node, one `ChildDeleted` in total.
    fn delete_nodes(&mut self, ids: &[NodeId]) {
        if ids.is_empty() {
            return;
        }
        self.clear_selection_within(ids);
        for &id in ids {
            self.emit(TreeEvent::DeletingChild(id));
        }

        let mut removed = FnvHashSet::default();
        for &id in ids {
            removed.extend(self.nodes.remove_subtree(id));
        }
        self.emit(TreeEvent::ChildDeleted);
        self.queue.purge(&removed);
    }

    fn clear_selection_within(&mut self, ids: &[NodeId]) {
        let Some(selected) = self.selection else {
            return;
        };
        if ids
            .iter()
            .any(|&id| self.nodes.is_ancestor_or_self(id, selected))
        {
            self.selection = None;
            self.emit(TreeEvent::SelectionChanged(None));
        }
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    /// Writes all toplevel items to a cache file.
    pub fn write_cache(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_busy() {
            return Err(DirTreeError::Busy);
        }
        let path = path.as_ref();
        let written = cache::write_cache_file(&self.nodes, self.nodes.toplevels(), path)?;
        tracing::info!("wrote {} nodes to cache {}", written, path.display());
        Ok(())
    }

    /// Writes the subtree rooted at `id` to a cache file.
    pub fn write_cache_subtree(&self, id: NodeId, path: impl AsRef<Path>) -> Result<()> {
        if self.is_busy() {
            return Err(DirTreeError::Busy);
        }
        let node = self.nodes.get(id).ok_or(DirTreeError::InvalidNode(id))?;
        match node.kind() {
            NodeKind::PseudoRoot => self.write_cache(path),
            NodeKind::DotEntry => Err(DirTreeError::InvalidInput(
                "a dot entry cannot be written on its own".into(),
            )),
            NodeKind::Directory | NodeKind::File => {
                let path = path.as_ref();
                let written = cache::write_cache_file(&self.nodes, &[id], path)?;
                tracing::info!("wrote {} nodes to cache {}", written, path.display());
                Ok(())
            }
        }
    }

    /// Reads a cache file and replays it into the tree.
    ///
    /// The file is fully decoded first; on failure the tree is left
    /// unchanged and a `ProgressInfo` describes the problem. Cached toplevel
    /// items replace toplevel items with the same path.
    pub fn read_cache(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_busy() {
            return Err(DirTreeError::Busy);
        }
        let path = path.as_ref();
        let entries = match cache::read_cache_file(path) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("cannot read cache {}: {}", path.display(), error);
                self.emit(TreeEvent::ProgressInfo(format!(
                    "Cannot read cache file {}: {error}",
                    path.display()
                )));
                return Err(error);
            }
        };
        tracing::info!(
            "reading cache {} ({} toplevel items)",
            path.display(),
            entries.len()
        );

        self.begin_cycle();
        let replaced: Vec<NodeId> = entries
            .iter()
            .filter_map(|entry| self.nodes.toplevel_named(&entry.record.name))
            .collect();
        self.delete_nodes(&replaced);
        for entry in entries {
            self.add_cached_toplevel(entry)?;
        }
        self.finish_cycle_if_idle();
        Ok(())
    }

    fn add_cached_toplevel(&mut self, entry: CachedEntry) -> Result<()> {
        let CachedEntry {
            kind,
            record,
            children,
        } = entry;
        let metadata = record.metadata();
        let flags = record.flags();
        let path = PathBuf::from(&record.name);
        let node_kind = match kind {
            CachedKind::Dir => NodeKind::Directory,
            CachedKind::File => NodeKind::File,
        };

        let root = self.nodes.root();
        let id = self
            .nodes
            .insert_child(root, record.name, node_kind, metadata)
            .ok_or_else(|| DirTreeError::Internal("pseudo root rejected a toplevel".into()))?;
        self.set_flags(id, flags, NodeFlags::empty());

        if kind == CachedKind::Dir && (!children.is_empty() || replays_children(flags)) {
            self.set_flags(id, NodeFlags::PENDING_READ, NodeFlags::empty());
            self.queue.enqueue(
                ReadJob::cached(id, path, children),
                self.options.cross_filesystems,
            );
        }
        self.emit(TreeEvent::ChildAdded(id));
        Ok(())
    }
}

/// Name of the toplevel item for a scan path: the path as given, without
/// trailing slashes.
fn toplevel_name(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() && raw.starts_with('/') {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}
