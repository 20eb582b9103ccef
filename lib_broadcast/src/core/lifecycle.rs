//! # Subscription Lifecycle State
//!
//! `Idle -> Probing -> Connecting -> Subscribing -> Consuming -> Closed`.
//! Any state may jump to `Closed`; nothing leaves `Closed`.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

use crate::broker::Topic;

/// Where a subscription scope is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, background task not started yet.
    Idle,
    /// Waiting on the liveness probe.
    Probing,
    /// Opening the broker connection.
    Connecting,
    /// Binding the topic.
    Subscribing,
    /// Delivering messages.
    Consuming,
    /// Torn down or failed. Terminal.
    Closed,
}

impl LifecycleState {
    /// Lowercase name, as logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Consuming => "consuming",
            Self::Closed => "closed",
        }
    }

    /// True once the scope can no longer deliver anything.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Probing => 1,
            Self::Connecting => 2,
            Self::Subscribing => 3,
            Self::Consuming => 4,
            Self::Closed => 5,
        }
    }

    /// Whether `self -> next` is a legal step.
    pub fn can_advance_to(&self, next: LifecycleState) -> bool {
        (next == Self::Closed && !self.is_closed()) || next.rank() == self.rank() + 1
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishing half of the state, owned by the background task.
pub(crate) struct StateTracker {
    topic: Topic,
    tx: watch::Sender<LifecycleState>,
}

impl StateTracker {
    pub(crate) fn new(topic: Topic) -> (Self, watch::Receiver<LifecycleState>) {
        let (tx, rx) = watch::channel(LifecycleState::Idle);
        (Self { topic, tx }, rx)
    }

    /// Moves to `next` if that is a legal step; illegal steps are ignored.
    pub(crate) fn advance(&self, next: LifecycleState) {
        let topic = &self.topic;
        self.tx.send_if_modified(|current| {
            if !current.can_advance_to(next) {
                return false;
            }
            debug!(%topic, from = %current, to = %next, "Lifecycle transition");
            *current = next;
            true
        });
    }
}
