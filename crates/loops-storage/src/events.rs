//! Change notifications published by store backends.
//!
//! Every successful write is announced on a tokio broadcast channel. Events
//! carry only the kind and key; consumers re-read the current state, so a
//! lagging receiver can recover by re-listing.

use loops_core::ObjectKey;
use tokio::sync::broadcast;

/// Receivers further behind than this see `RecvError::Lagged`.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOp {
    Created,
    Updated,
    Deleted,
}

/// A change to one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    pub kind: String,
    pub key: ObjectKey,
    pub op: ObjectOp,
}

impl ObjectEvent {
    pub fn new(kind: impl Into<String>, key: ObjectKey, op: ObjectOp) -> Self {
        Self {
            kind: kind.into(),
            key,
            op,
        }
    }
}

/// Fan-out of [`ObjectEvent`]s to every subscriber. Clones share one channel.
#[derive(Clone)]
pub struct ObjectEventBroadcaster {
    sender: broadcast::Sender<ObjectEvent>,
}

impl ObjectEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of receivers reached; nobody listening is not an error.
    pub fn send(&self, event: ObjectEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Only events sent after this call are observed.
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ObjectEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectEventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
