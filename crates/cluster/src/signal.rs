//! Health signals and the bus that carries group notifications.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::node::Node;

/// Default number of buffered notifications per subscriber.
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// A health attribute of a node that external pollers keep up to date.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalId {
    /// The clustered service on the node is answering requests.
    ServiceUp,

    /// The node's administrative process is reachable.
    ControllerProcessRunning,

    /// The node has been bootstrapped as a coordinator.
    CoordinatorInitialized,
}

impl SignalId {
    /// Every known signal.
    pub const ALL: [Self; 3] = [
        Self::ServiceUp,
        Self::ControllerProcessRunning,
        Self::CoordinatorInitialized,
    ];

    /// Returns the signal's stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceUp => "service-up",
            Self::ControllerProcessRunning => "controller-process-running",
            Self::CoordinatorInitialized => "coordinator-initialized",
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification about the desired group or one of its members.
#[derive(Clone, Debug)]
pub enum GroupEvent {
    /// A node joined the desired group.
    Added(Arc<Node>),

    /// A node was taken out of the desired group.
    Removed(Arc<Node>),

    /// A health signal of a node was reported.
    Changed {
        /// The node that reported.
        node: Arc<Node>,
        /// The signal that was reported.
        signal: SignalId,
        /// The reported value.
        value: bool,
    },
}

impl GroupEvent {
    /// Returns the node the notification is about.
    #[must_use]
    pub fn node(&self) -> &Arc<Node> {
        match self {
            Self::Added(node) | Self::Removed(node) | Self::Changed { node, .. } => node,
        }
    }
}

/// Fan-out channel for group notifications.
///
/// Publishing never blocks, so it is safe to publish while holding the group's
/// membership lock. Slow subscribers lose the oldest notifications and are told
/// so through [`broadcast::error::RecvError::Lagged`]. A buffered notification
/// keeps its node alive until every subscriber has read it or been dropped.
#[derive(Clone, Debug)]
pub struct HealthSignalBus {
    sender: broadcast::Sender<GroupEvent>,
}

impl HealthSignalBus {
    /// Creates a bus buffering up to `capacity` notifications per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notification, returning how many subscribers will see it.
    pub fn publish(&self, event: GroupEvent) -> usize {
        trace!("Publishing group event for {}", event.node().node_id());
        // No subscribers is not an error: nobody is tracking this group yet.
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribes to notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HealthSignalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
