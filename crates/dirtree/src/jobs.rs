//! Read jobs and the queue that schedules them.

mod queue;
mod read_job;

pub use queue::{Enqueued, ReadJobQueue};
pub use read_job::{JobState, ReadJob};

pub(crate) use read_job::{finalize_dir, mark_not_descended, replays_children, JobContext};
