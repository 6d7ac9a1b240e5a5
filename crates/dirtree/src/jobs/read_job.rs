//! A unit of work that populates one directory.
//!
//! A job lists its target directory (or replays the cached children of it),
//! creates a node per entry and enqueues a new job for every subdirectory, so
//! the scan recurses through the queue instead of the call stack.

use std::io;
use std::path::{Path, PathBuf};

use crate::cache::{CachedEntry, CachedKind};
use crate::cancel::CancellationToken;
use crate::config::ExcludeRules;
use crate::notify::{NotificationHub, TreeEvent};
use crate::reader::DirectoryReader;
use crate::storage::{NodeFlags, NodeId, NodeKind, NodeMetadata};
use crate::tree::FileNodes;
use crate::types::{RawEntry, ScanStats};

use super::queue::{Enqueued, ReadJobQueue};

/// Life cycle of a read job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    /// All entries were integrated.
    Finished,
    /// The directory could not be listed; it is flagged `READ_ERROR`.
    Failed,
    /// The target was gone, or the scan was aborted mid-way.
    Canceled,
}

#[derive(Debug)]
enum JobSource {
    /// List the directory through the tree's reader.
    LocalDir {
        listing: Option<io::Result<Vec<RawEntry>>>,
    },
    /// Replay children decoded from a cache file.
    CachedDir { children: Vec<CachedEntry> },
}

/// Everything a job needs from its tree while it runs.
pub(crate) struct JobContext<'a> {
    pub nodes: &'a mut FileNodes,
    pub hub: &'a mut NotificationHub,
    pub queue: &'a mut ReadJobQueue,
    pub reader: &'a dyn DirectoryReader,
    pub excludes: &'a ExcludeRules,
    pub cross_filesystems: bool,
    pub cancel: &'a CancellationToken,
    pub stats: &'a mut ScanStats,
}

impl JobContext<'_> {
    fn emit(&mut self, event: TreeEvent) {
        self.hub.emit(self.nodes, event);
    }

    fn set_flags(&mut self, id: NodeId, insert: NodeFlags, remove: NodeFlags) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.flags.remove(remove);
            node.flags.insert(insert);
        }
    }

    /// Adds a non-directory entry to the dot entry of `dir`.
    fn add_file(&mut self, dir: NodeId, name: &str, metadata: NodeMetadata) {
        let Some((dot, created)) = self.nodes.ensure_dot_entry(dir) else {
            return;
        };
        if created {
            self.emit(TreeEvent::ChildAdded(dot));
        }
        if let Some(file) = self.nodes.insert_child(dot, name, NodeKind::File, metadata) {
            self.stats.files_seen += 1;
            self.emit(TreeEvent::ChildAdded(file));
        }
    }

    /// Hands a subdirectory job to the queue and records the outcome on the
    /// node. Cross-filesystem jobs the policy refuses leave the directory as
    /// an unread mount point; returns true in that case.
    fn schedule(&mut self, job: ReadJob) -> bool {
        let target = job.target;
        match self.queue.enqueue(job, self.cross_filesystems) {
            Enqueued::Primary | Enqueued::Deferred => false,
            Enqueued::Dropped => {
                mark_not_descended(self.nodes, target);
                true
            }
        }
    }
}

/// Flags a directory as a mount point that is left unread.
pub(crate) fn mark_not_descended(nodes: &mut FileNodes, dir: NodeId) {
    if let Some(node) = nodes.get_mut(dir) {
        node.flags.remove(NodeFlags::PENDING_READ);
        node.flags
            .insert(NodeFlags::MOUNT_POINT | NodeFlags::NOT_DESCENDED);
    }
}

/// A queued request to populate one directory node.
#[derive(Debug)]
pub struct ReadJob {
    target: NodeId,
    path: PathBuf,
    crosses_filesystem: bool,
    state: JobState,
    source: JobSource,
}

impl ReadJob {
    /// Creates a job that lists `path` from disk into `target`.
    pub fn local(target: NodeId, path: PathBuf, crosses_filesystem: bool) -> Self {
        Self {
            target,
            path,
            crosses_filesystem,
            state: JobState::Pending,
            source: JobSource::LocalDir { listing: None },
        }
    }

    /// Creates a job that replays cached children into `target`.
    pub fn cached(target: NodeId, path: PathBuf, children: Vec<CachedEntry>) -> Self {
        Self {
            target,
            path,
            crosses_filesystem: false,
            state: JobState::Pending,
            source: JobSource::CachedDir { children },
        }
    }

    #[inline]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn crosses_filesystem(&self) -> bool {
        self.crosses_filesystem
    }

    #[inline]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Returns true if this job still has to list its directory from disk.
    pub(crate) fn needs_listing(&self) -> bool {
        matches!(self.source, JobSource::LocalDir { listing: None })
    }

    /// Lists the directory ahead of integration. Safe to call from a worker
    /// thread; the tree is not touched.
    pub(crate) fn prefetch(&mut self, reader: &dyn DirectoryReader) {
        if let JobSource::LocalDir { listing } = &mut self.source {
            if listing.is_none() {
                *listing = Some(reader.read_dir(&self.path));
            }
        }
    }

    /// Runs the job to completion against the tree.
    pub(crate) fn run(mut self, ctx: &mut JobContext<'_>) -> JobState {
        if !ctx.nodes.contains(self.target) {
            tracing::debug!("read job for {} retired: target gone", self.path.display());
            ctx.stats.canceled_jobs += 1;
            return JobState::Canceled;
        }

        self.state = JobState::Running;
        ctx.emit(TreeEvent::StartingReadingDir(self.target));

        let source = std::mem::replace(&mut self.source, JobSource::LocalDir { listing: None });
        self.state = match source {
            JobSource::LocalDir { listing } => {
                let listing = listing.unwrap_or_else(|| ctx.reader.read_dir(&self.path));
                self.integrate_listing(ctx, listing)
            }
            JobSource::CachedDir { children } => self.integrate_cached(ctx, children),
        };

        match self.state {
            JobState::Finished => ctx.stats.dirs_read += 1,
            JobState::Failed => ctx.stats.read_errors += 1,
            _ => {}
        }
        if self.state != JobState::Canceled {
            finalize_dir(ctx.nodes, ctx.hub, self.target);
        }
        self.state
    }

    fn integrate_listing(
        &self,
        ctx: &mut JobContext<'_>,
        listing: io::Result<Vec<RawEntry>>,
    ) -> JobState {
        let entries = match listing {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("cannot read directory {}: {}", self.path.display(), error);
                ctx.set_flags(self.target, NodeFlags::READ_ERROR, NodeFlags::empty());
                return JobState::Failed;
            }
        };

        let parent_device = ctx
            .nodes
            .get(self.target)
            .map(|node| node.metadata.device)
            .unwrap_or_default();

        for entry in entries {
            if ctx.cancel.is_cancelled() {
                return self.abandon(ctx);
            }
            if !entry.is_dir() {
                ctx.add_file(self.target, &entry.name, entry.metadata);
                continue;
            }

            let child_path = self.path.join(&entry.os_name);
            let Some(child) =
                ctx.nodes
                    .insert_child(self.target, entry.name, NodeKind::Directory, entry.metadata)
            else {
                continue;
            };
            let crosses = entry.metadata.device != parent_device;
            if crosses {
                ctx.set_flags(child, NodeFlags::MOUNT_POINT, NodeFlags::empty());
            }
            let mut dropped = false;
            if ctx.excludes.excludes_dir(&child_path) {
                ctx.set_flags(
                    child,
                    NodeFlags::EXCLUDED | NodeFlags::NOT_DESCENDED,
                    NodeFlags::empty(),
                );
            } else {
                ctx.set_flags(child, NodeFlags::PENDING_READ, NodeFlags::empty());
                dropped = ctx.schedule(ReadJob::local(child, child_path, crosses));
            }
            ctx.emit(TreeEvent::ChildAdded(child));
            if dropped {
                finalize_dir(ctx.nodes, ctx.hub, child);
            }
        }
        JobState::Finished
    }

    fn integrate_cached(&self, ctx: &mut JobContext<'_>, children: Vec<CachedEntry>) -> JobState {
        for entry in children {
            if ctx.cancel.is_cancelled() {
                return self.abandon(ctx);
            }
            let metadata = entry.record.metadata();
            match entry.kind {
                CachedKind::File => ctx.add_file(self.target, &entry.record.name, metadata),
                CachedKind::Dir => {
                    let flags = entry.record.flags();
                    let replay = !entry.children.is_empty() || replays_children(flags);
                    let child_path = self.path.join(&entry.record.name);
                    let Some(child) = ctx.nodes.insert_child(
                        self.target,
                        entry.record.name,
                        NodeKind::Directory,
                        metadata,
                    ) else {
                        continue;
                    };
                    ctx.set_flags(child, flags, NodeFlags::empty());
                    if replay {
                        ctx.set_flags(child, NodeFlags::PENDING_READ, NodeFlags::empty());
                        ctx.queue.enqueue(
                            ReadJob::cached(child, child_path, entry.children),
                            ctx.cross_filesystems,
                        );
                    }
                    ctx.emit(TreeEvent::ChildAdded(child));
                }
            }
        }

        let failed = ctx
            .nodes
            .get(self.target)
            .is_some_and(|node| node.has_read_error());
        if failed {
            JobState::Failed
        } else {
            JobState::Finished
        }
    }

    /// Stops integrating after an abort request.
    fn abandon(&self, ctx: &mut JobContext<'_>) -> JobState {
        tracing::debug!("read job for {} abandoned", self.path.display());
        ctx.set_flags(self.target, NodeFlags::ABORTED, NodeFlags::PENDING_READ);
        JobState::Canceled
    }
}

/// Returns true if a cached directory with these flags was read when the
/// cache was written, so it gets a replay job even without children.
pub(crate) fn replays_children(flags: NodeFlags) -> bool {
    !flags.intersects(NodeFlags::EXCLUDED | NodeFlags::NOT_DESCENDED | NodeFlags::ABORTED)
}

/// Finishes one directory level: clears the pending flag, fixes up the
/// totals and announces `FinalizeLocal` followed by `ReadJobFinished`.
pub(crate) fn finalize_dir(nodes: &mut FileNodes, hub: &mut NotificationHub, dir: NodeId) {
    let Some(node) = nodes.get_mut(dir) else {
        return;
    };
    node.flags.remove(NodeFlags::PENDING_READ);
    nodes.recompute_totals(dir);
    hub.emit(nodes, TreeEvent::FinalizeLocal(dir));
    hub.emit(nodes, TreeEvent::ReadJobFinished(dir));
}
