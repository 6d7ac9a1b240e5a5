//! ReadJobQueue - pending directory reads.
//!
//! Jobs for directories on the same filesystem as their parent go to the
//! primary lane. Jobs that cross onto another filesystem go to the deferred
//! lane, which is only drained once the primary lane is empty, so the
//! starting filesystem is completely read first. When crossing filesystems
//! is disabled such jobs are refused.

use std::collections::VecDeque;

use fnv::FnvHashSet;
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::reader::DirectoryReader;
use crate::storage::NodeId;

use super::read_job::ReadJob;

/// Where [`ReadJobQueue::enqueue`] put a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Primary,
    Deferred,
    /// The job crosses a filesystem boundary and crossing is disabled.
    Dropped,
}

#[derive(Debug, Default)]
pub struct ReadJobQueue {
    primary: VecDeque<ReadJob>,
    deferred: VecDeque<ReadJob>,
}

impl ReadJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, job: ReadJob, cross_filesystems: bool) -> Enqueued {
        if !job.crosses_filesystem() {
            self.primary.push_back(job);
            return Enqueued::Primary;
        }
        if cross_filesystems {
            self.deferred.push_back(job);
            Enqueued::Deferred
        } else {
            tracing::debug!("not descending into mount point {}", job.path().display());
            Enqueued::Dropped
        }
    }

    /// Takes the next job, primary lane first.
    pub fn pop(&mut self) -> Option<ReadJob> {
        self.primary
            .pop_front()
            .or_else(|| self.deferred.pop_front())
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.deferred.is_empty()
    }

    /// Discards every job, returning their targets.
    pub fn clear(&mut self) -> Vec<NodeId> {
        self.primary
            .drain(..)
            .chain(self.deferred.drain(..))
            .map(|job| job.target())
            .collect()
    }

    /// Discards every job whose target is in `targets`. Returns how many
    /// jobs were removed.
    pub fn purge(&mut self, targets: &FnvHashSet<NodeId>) -> usize {
        let before = self.len();
        self.primary.retain(|job| !targets.contains(&job.target()));
        self.deferred.retain(|job| !targets.contains(&job.target()));
        before - self.len()
    }

    /// Lists up to `limit` queued directories in parallel so the next jobs
    /// find their entries already fetched.
    ///
    /// Only the listing happens on the rayon pool; integrating results into
    /// the tree stays with the caller, in queue order.
    pub(crate) fn prefetch(
        &mut self,
        reader: &dyn DirectoryReader,
        token: &CancellationToken,
        limit: usize,
    ) -> usize {
        let mut batch: Vec<&mut ReadJob> = self
            .primary
            .iter_mut()
            .chain(self.deferred.iter_mut())
            .filter(|job| job.needs_listing())
            .take(limit)
            .collect();
        if batch.len() < 2 {
            return 0;
        }

        let fetched = batch.len();
        batch.par_iter_mut().for_each(|job| {
            if token.is_cancelled() {
                return;
            }
            job.prefetch(reader);
        });
        tracing::trace!("prefetched {} directory listings", fetched);
        fetched
    }
}
