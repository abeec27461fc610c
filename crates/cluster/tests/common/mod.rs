//! Test cluster utilities for integration testing

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use proven_cluster::{
    ClusterConfig, ClusterController, Credentials, HealthSignalBus, MemberGroup, Node,
    NodeAddress, NodeId, NodeOptions, ReconcileOutcome, SignalId,
};
use proven_cluster_driver_mock::MockClusterDriver;

/// A group, its controller and the mock backing cluster.
pub struct TestCluster {
    pub bus: HealthSignalBus,
    pub group: Arc<MemberGroup>,
    pub controller: Arc<ClusterController<MockClusterDriver>>,
    pub driver: MockClusterDriver,
}

impl TestCluster {
    pub fn new(desired_size: usize) -> Self {
        Self::with_config(
            ClusterConfig {
                desired_size,
                ..ClusterConfig::default()
            },
            MockClusterDriver::new(),
        )
    }

    pub fn with_config(config: ClusterConfig, driver: MockClusterDriver) -> Self {
        let bus = HealthSignalBus::default();
        let group = Arc::new(MemberGroup::new("test-cluster", bus.clone()));
        let controller = Arc::new(ClusterController::new(
            config,
            Arc::clone(&group),
            driver.clone(),
        ));

        Self {
            bus,
            group,
            controller,
            driver,
        }
    }

    /// Adds `count` nodes named `node-<n>`, numbering on from the current size.
    pub fn add_nodes(&self, count: usize) -> Vec<Arc<Node>> {
        let start = self.group.len();
        (start..start + count)
            .map(|n| self.group.add_member(node_options(n)))
            .collect()
    }

    /// Brings `nodes` up, elects the first as an initialized primary and joins the rest.
    /// Recorded driver calls are cleared afterwards.
    pub async fn form(&self, nodes: &[Arc<Node>]) {
        for node in nodes {
            node.set_signal(SignalId::ServiceUp, true);
        }

        let elected = self.controller.reconcile_all().await.unwrap();
        assert_eq!(elected, ReconcileOutcome::Elected(nodes[0].node_id().clone()));

        nodes[0].set_signal(SignalId::CoordinatorInitialized, true);
        self.controller.reconcile_all().await.unwrap();
        assert_eq!(self.controller.active_member_count(), nodes.len());

        self.driver.clear_calls().await;
    }

    pub fn primary_count(&self) -> usize {
        self.group
            .members()
            .iter()
            .filter(|node| node.is_primary())
            .count()
    }
}

pub fn node_id(n: usize) -> NodeId {
    NodeId::new(format!("node-{n}"))
}

pub fn node_options(n: usize) -> NodeOptions {
    NodeOptions {
        node_id: node_id(n),
        address: NodeAddress::new(format!("10.0.0.{}", n + 1), 8091),
        credentials: Credentials::new("Administrator", "password"),
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
