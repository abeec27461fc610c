//! The desired group of candidate members.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;
use proven_cluster_driver::NodeId;
use tracing::info;

use crate::node::{Node, NodeOptions};
use crate::signal::{GroupEvent, HealthSignalBus};

/// The set of nodes a cluster should consist of, in insertion order.
///
/// `Added` and `Removed` notifications are published while the membership lock
/// is held.
#[derive(Debug)]
pub struct MemberGroup {
    name: String,
    bus: HealthSignalBus,
    members: RwLock<IndexMap<NodeId, Arc<Node>>>,
    started: AtomicBool,
}

impl MemberGroup {
    /// Creates an empty, started group reporting on `bus`.
    pub fn new(name: impl Into<String>, bus: HealthSignalBus) -> Self {
        Self {
            name: name.into(),
            bus,
            members: RwLock::new(IndexMap::new()),
            started: AtomicBool::new(true),
        }
    }

    /// Returns the group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bus the group and its members report on.
    #[must_use]
    pub const fn bus(&self) -> &HealthSignalBus {
        &self.bus
    }

    /// Creates a node on the group's bus and adds it.
    ///
    /// If a member with the same id exists it is returned unchanged.
    pub fn add_member(&self, options: NodeOptions) -> Arc<Node> {
        let mut members = self.members.write();
        if let Some(existing) = members.get(&options.node_id) {
            return Arc::clone(existing);
        }

        let node = Arc::new(Node::new(options, self.bus.clone()));
        members.insert(node.node_id().clone(), Arc::clone(&node));
        info!("added {} to group {}", node.node_id(), self.name);
        self.bus.publish(GroupEvent::Added(Arc::clone(&node)));

        node
    }

    /// Adds an existing node. Returns `false` if its id is already a member.
    pub fn add_existing(&self, node: Arc<Node>) -> bool {
        let mut members = self.members.write();
        if members.contains_key(node.node_id()) {
            return false;
        }

        members.insert(node.node_id().clone(), Arc::clone(&node));
        info!("added {} to group {}", node.node_id(), self.name);
        self.bus.publish(GroupEvent::Added(node));

        true
    }

    /// Takes a node out of the group.
    pub fn remove_member(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        let mut members = self.members.write();
        let node = members.shift_remove(node_id)?;

        info!("removed {} from group {}", node_id, self.name);
        self.bus.publish(GroupEvent::Removed(Arc::clone(&node)));

        Some(node)
    }

    /// Snapshot of the members in iteration order.
    #[must_use]
    pub fn members(&self) -> Vec<Arc<Node>> {
        self.members.read().values().cloned().collect()
    }

    /// Returns the member with the given id.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        self.members.read().get(node_id).cloned()
    }

    /// Whether a node with the given id is a member.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.members.read().contains_key(node_id)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Marks the group as started or stopped.
    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    /// Whether the group is marked as started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The group's own up/down verdict: started and at least one member up.
    #[must_use]
    pub fn base_service_up(&self) -> bool {
        self.is_started() && self.members.read().values().any(|node| node.service_up())
    }
}
