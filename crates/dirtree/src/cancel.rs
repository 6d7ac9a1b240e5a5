//! Abort handles for running directory scans.
//!
//! A scan cycle captures the current generation of its [`AbortHandle`] in a
//! [`CancellationToken`]. Calling [`AbortHandle::abort`] bumps the generation,
//! so every token handed out earlier reports itself as cancelled. The handle
//! is `Send + Sync` and may be triggered from any thread; the scan pipeline
//! itself only ever polls tokens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared abort switch for a [`crate::DirTree`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    generation: Arc<AtomicU64>,
}

impl AbortHandle {
    /// Creates a new handle at generation zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of everything started before this call.
    ///
    /// Returns the new generation.
    pub fn abort(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current generation without changing it.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Creates a token bound to the current generation.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            generation: Arc::clone(&self.generation),
            version: self.current_generation(),
        }
    }
}

/// A cancellation token for one scan cycle.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    generation: Arc<AtomicU64>,
    version: u64,
}

impl CancellationToken {
    /// Creates a token that is never cancelled.
    pub fn noop() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            version: 0,
        }
    }

    /// Returns `Some(())` while still active, `None` once cancelled.
    ///
    /// Shaped for use with `?` in functions returning `Option`.
    #[inline]
    pub fn is_active(&self) -> Option<()> {
        if self.is_cancelled() {
            None
        } else {
            Some(())
        }
    }

    /// Returns true if the owning handle was aborted after this token was made.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.version != self.generation.load(Ordering::Relaxed)
    }
}

impl Default for CancellationToken {
    /// Default creates a noop token that is never cancelled.
    fn default() -> Self {
        Self::noop()
    }
}
