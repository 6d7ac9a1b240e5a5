//! Tree notifications.
//!
//! Every structural change, read-progress step and selection change of a
//! [`crate::DirTree`] is announced as a [`TreeEvent`]. Events are delivered
//! in emission order on the thread that drives the tree:
//!
//! - synchronous [`TreeObserver`]s see the node arena as it is at the moment
//!   of the event (a node named by `DeletingChild` is still readable);
//! - [`NotificationHub::subscribe`] hands out a broadcast receiver for
//!   consumers that only need the event stream itself.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::storage::NodeId;
use crate::tree::FileNodes;

/// Capacity of the broadcast channel behind [`NotificationHub::subscribe`].
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// A read cycle (scan, refresh or cache read) started.
    StartingReading,
    /// Reading the listed directory started.
    StartingReadingDir(NodeId),
    ChildAdded(NodeId),
    /// The node and its subtree are about to be removed.
    DeletingChild(NodeId),
    /// One or more nodes were removed by one logical operation.
    ChildDeleted,
    /// All direct children of the directory are known.
    FinalizeLocal(NodeId),
    /// The read job of the directory retired. Sent after `FinalizeLocal`.
    ReadJobFinished(NodeId),
    /// The read cycle completed; the queue is empty.
    Finished,
    /// The read cycle was aborted.
    Aborted,
    SelectionChanged(Option<NodeId>),
    /// Single line of human readable progress.
    ProgressInfo(String),
}

/// Receives tree events synchronously.
pub trait TreeObserver: Send {
    fn on_event(&mut self, nodes: &FileNodes, event: &TreeEvent);
}

impl<F> TreeObserver for F
where
    F: FnMut(&FileNodes, &TreeEvent) + Send,
{
    fn on_event(&mut self, nodes: &FileNodes, event: &TreeEvent) {
        self(nodes, event)
    }
}

/// Fans tree events out to observers and broadcast subscribers.
pub struct NotificationHub {
    observers: Vec<Box<dyn TreeObserver>>,
    sender: broadcast::Sender<TreeEvent>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("observers", &self.observers.len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: Vec::new(),
            sender,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    /// Subscribes to the event stream. A receiver that falls more than the
    /// channel capacity behind observes `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&mut self, nodes: &FileNodes, event: TreeEvent) {
        for observer in &mut self.observers {
            observer.on_event(nodes, &event);
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

/// Observer that records every event; cheap to clone and inspect.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TreeEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<TreeEvent> {
        self.events.lock().clone()
    }

    /// Returns and forgets all recorded events.
    pub fn take(&self) -> Vec<TreeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Counts recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&TreeEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl TreeObserver for EventLog {
    fn on_event(&mut self, _nodes: &FileNodes, event: &TreeEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_and_subscribers_see_events_in_order() {
        let nodes = FileNodes::new();
        let mut hub = NotificationHub::default();
        let log = EventLog::new();
        hub.add_observer(Box::new(log.clone()));
        let mut rx = hub.subscribe();

        hub.emit(&nodes, TreeEvent::StartingReading);
        hub.emit(&nodes, TreeEvent::Finished);

        assert_eq!(
            log.events(),
            vec![TreeEvent::StartingReading, TreeEvent::Finished]
        );
        assert_eq!(rx.try_recv().unwrap(), TreeEvent::StartingReading);
        assert_eq!(rx.try_recv().unwrap(), TreeEvent::Finished);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closure_observer_can_read_nodes() {
        let nodes = FileNodes::new();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_by_observer = Arc::clone(&seen);
        let mut hub = NotificationHub::default();
        hub.add_observer(Box::new(move |nodes: &FileNodes, _: &TreeEvent| {
            *seen_by_observer.lock() = nodes.len();
        }));

        hub.emit(&nodes, TreeEvent::ChildDeleted);
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let nodes = FileNodes::new();
        let mut hub = NotificationHub::new(1);
        hub.emit(&nodes, TreeEvent::Aborted);
    }
}
