//! A candidate cluster member and its observed health.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use proven_cluster_driver::{Credentials, NodeAddress, NodeId, NodeTarget};

use crate::signal::{GroupEvent, HealthSignalBus, SignalId};

/// Options for creating a `Node`.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Stable identity of the node.
    pub node_id: NodeId,

    /// Administrative address of the node.
    pub address: NodeAddress,

    /// Credentials used for administrative calls against the node.
    pub credentials: Credentials,
}

/// One candidate member of a cluster.
///
/// Health flags are written by external pollers through [`Node::set_signal`].
/// Membership flags are owned by the controller and only readable from outside
/// this crate.
#[derive(Debug)]
pub struct Node {
    node_id: NodeId,
    address: NodeAddress,
    credentials: Credentials,

    service_up: AtomicBool,
    controller_process_running: AtomicBool,
    coordinator_initialized: AtomicBool,

    is_active_member: AtomicBool,
    is_primary: AtomicBool,

    bus: HealthSignalBus,
}

impl Node {
    /// Creates a node with every flag cleared, reporting on `bus`.
    #[must_use]
    pub fn new(
        NodeOptions {
            node_id,
            address,
            credentials,
        }: NodeOptions,
        bus: HealthSignalBus,
    ) -> Self {
        Self {
            node_id,
            address,
            credentials,
            service_up: AtomicBool::new(false),
            controller_process_running: AtomicBool::new(false),
            coordinator_initialized: AtomicBool::new(false),
            is_active_member: AtomicBool::new(false),
            is_primary: AtomicBool::new(false),
            bus,
        }
    }

    /// Returns the node's id.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the node's administrative address.
    #[must_use]
    pub const fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Returns the node's credentials.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Addressing data handed to driver calls.
    #[must_use]
    pub fn target(&self) -> NodeTarget {
        NodeTarget {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            credentials: self.credentials.clone(),
        }
    }

    const fn flag(&self, signal: SignalId) -> &AtomicBool {
        match signal {
            SignalId::ServiceUp => &self.service_up,
            SignalId::ControllerProcessRunning => &self.controller_process_running,
            SignalId::CoordinatorInitialized => &self.coordinator_initialized,
        }
    }

    /// Reads a health signal.
    #[must_use]
    pub fn signal(&self, signal: SignalId) -> bool {
        self.flag(signal).load(Ordering::Acquire)
    }

    /// Records a health signal and reports it on the bus.
    ///
    /// The notification is published even if the value did not change.
    pub fn set_signal(self: &Arc<Self>, signal: SignalId, value: bool) {
        self.flag(signal).store(value, Ordering::Release);
        self.bus.publish(GroupEvent::Changed {
            node: Arc::clone(self),
            signal,
            value,
        });
    }

    /// Whether the clustered service on the node is up.
    #[must_use]
    pub fn service_up(&self) -> bool {
        self.signal(SignalId::ServiceUp)
    }

    /// Whether the node's administrative process is reachable.
    #[must_use]
    pub fn controller_process_running(&self) -> bool {
        self.signal(SignalId::ControllerProcessRunning)
    }

    /// Whether the node has finished bootstrapping as a coordinator.
    #[must_use]
    pub fn coordinator_initialized(&self) -> bool {
        self.signal(SignalId::CoordinatorInitialized)
    }

    /// Whether the controller has joined this node into the backing cluster.
    #[must_use]
    pub fn is_active_member(&self) -> bool {
        self.is_active_member.load(Ordering::Acquire)
    }

    /// Whether this node is the cluster's primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.is_primary.load(Ordering::Acquire)
    }

    pub(crate) fn set_active_member(&self, value: bool) {
        self.is_active_member.store(value, Ordering::Release);
    }

    pub(crate) fn set_primary(&self, value: bool) {
        self.is_primary.store(value, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn options(id: &str, port: u16) -> NodeOptions {
        NodeOptions {
            node_id: NodeId::new(id),
            address: NodeAddress::new("127.0.0.1", port),
            credentials: Credentials::new("admin", "password"),
        }
    }

    pub(crate) fn test_node(id: &str, bus: &HealthSignalBus) -> Arc<Node> {
        Arc::new(Node::new(options(id, 8091), bus.clone()))
    }

    #[test]
    fn test_new_node_has_no_flags() {
        let node = test_node("a", &HealthSignalBus::default());

        for signal in SignalId::ALL {
            assert!(!node.signal(signal));
        }
        assert!(!node.is_active_member());
        assert!(!node.is_primary());
    }

    #[tokio::test]
    async fn test_set_signal_publishes_every_report() {
        let bus = HealthSignalBus::default();
        let mut receiver = bus.subscribe();
        let node = test_node("a", &bus);

        node.set_signal(SignalId::ServiceUp, true);
        node.set_signal(SignalId::ServiceUp, true);

        assert!(node.service_up());
        for _ in 0..2 {
            match receiver.recv().await.unwrap() {
                GroupEvent::Changed { signal, value, .. } => {
                    assert_eq!(signal, SignalId::ServiceUp);
                    assert!(value);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_buffered_reports_release_node_with_receiver() {
        let bus = HealthSignalBus::default();
        let receiver = bus.subscribe();
        let node = test_node("a", &bus);
        node.set_signal(SignalId::ServiceUp, true);

        let weak = Arc::downgrade(&node);
        drop(node);
        // Still referenced by the unread notification.
        assert!(weak.upgrade().is_some());

        drop(receiver);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_target_carries_addressing() {
        let node = test_node("a", &HealthSignalBus::default());
        let target = node.target();

        assert_eq!(target.node_id, *node.node_id());
        assert_eq!(target.address.to_string(), "127.0.0.1:8091");
    }
}
