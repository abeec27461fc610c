//! Primary departure and failed-node recovery

use assert_matches::assert_matches;
use proven_cluster::{ClusterConfig, Error, NodeId, ReconcileOutcome, ReconcilePhase, SignalId};
use proven_cluster_driver::DriverAction;
use proven_cluster_driver_mock::{DriverCall, MockClusterDriver};
use tracing_test::traced_test;

mod common;
use common::{TestCluster, node_id};

#[tokio::test]
#[traced_test]
async fn test_departed_primary_fails_over_to_joined_member() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes).await;

    let old_primary = cluster.group.remove_member(&node_id(0)).unwrap();

    // The successor has not reported as coordinator yet.
    assert_eq!(
        cluster.controller.reconcile_all().await.unwrap(),
        ReconcileOutcome::Deferred(ReconcilePhase::AwaitingCoordinatorReady)
    );
    assert_eq!(cluster.controller.primary_node_id(), Some(node_id(1)));
    assert!(!old_primary.is_primary());
    assert!(nodes[1].is_primary());
    assert_eq!(cluster.primary_count(), 1);
    assert!(cluster.driver.calls().await.is_empty());

    nodes[1].set_signal(SignalId::CoordinatorInitialized, true);
    assert_matches!(
        cluster.controller.reconcile_all().await,
        Ok(ReconcileOutcome::Reconciled { left, .. }) if left == vec![node_id(0)]
    );
    assert_eq!(
        cluster.driver.calls().await,
        vec![DriverCall::Leave {
            coordinator: node_id(1),
            leaving: node_id(0),
        }]
    );
    assert!(!old_primary.is_active_member());
    assert_eq!(cluster.controller.active_member_count(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_departed_primary_without_successor_is_reelected() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(2);
    cluster.form(&nodes[..1]).await;

    cluster.group.remove_member(&node_id(0));
    nodes[1].set_signal(SignalId::ServiceUp, true);

    assert_eq!(
        cluster.controller.reconcile_all().await.unwrap(),
        ReconcileOutcome::Elected(node_id(1))
    );
    assert_eq!(
        cluster.driver.calls().await,
        vec![DriverCall::InitializeCoordinator { node: node_id(1) }]
    );

    // A fresh coordinator starts a new backing cluster.
    assert!(!nodes[0].is_primary());
    assert!(!nodes[0].is_active_member());
    assert_eq!(cluster.controller.active_member_count(), 0);
    assert_eq!(cluster.primary_count(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_departed_primary_with_nobody_ready_clears_primary() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(2);
    cluster.form(&nodes[..1]).await;

    cluster.group.remove_member(&node_id(0));

    assert_eq!(
        cluster.controller.reconcile_all().await.unwrap(),
        ReconcileOutcome::Deferred(ReconcilePhase::NoPrimary)
    );
    assert_eq!(cluster.controller.primary_node_id(), None);
    assert!(!nodes[0].is_primary());
}

#[tokio::test]
#[traced_test]
async fn test_unready_primary_hands_over() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes).await;
    nodes[1].set_signal(SignalId::CoordinatorInitialized, true);

    nodes[0].set_signal(SignalId::ServiceUp, false);

    assert_matches!(
        cluster.controller.reconcile_all().await,
        Ok(ReconcileOutcome::Reconciled { left, rebalanced: false, .. }) if left == vec![node_id(0)]
    );
    assert_eq!(cluster.controller.primary_node_id(), Some(node_id(1)));
    assert_eq!(cluster.primary_count(), 1);
    assert_eq!(
        cluster.driver.calls().await,
        vec![DriverCall::Leave {
            coordinator: node_id(1),
            leaving: node_id(0),
        }]
    );
}

#[tokio::test]
#[traced_test]
async fn test_flapping_primary_is_kept_without_initialized_successor() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes).await;

    // Only node-0 reports as coordinator, so nobody can take over.
    nodes[0].set_signal(SignalId::ServiceUp, false);
    assert_matches!(
        cluster.controller.reconcile_all().await,
        Ok(ReconcileOutcome::Reconciled { joined, left, .. }) if joined.is_empty() && left.is_empty()
    );
    assert_eq!(cluster.controller.primary_node_id(), Some(node_id(0)));
    assert!(nodes[0].is_primary());
    assert!(!nodes[1].is_primary());

    nodes[0].set_signal(SignalId::ServiceUp, true);
    let late = cluster.add_nodes(1);
    late[0].set_signal(SignalId::ServiceUp, true);

    assert_matches!(
        cluster.controller.reconcile_all().await,
        Ok(ReconcileOutcome::Reconciled { joined, rebalanced: true, .. }) if joined == vec![node_id(3)]
    );
    assert_eq!(cluster.controller.active_member_count(), 4);
    assert_eq!(cluster.primary_count(), 1);
    assert_eq!(
        cluster.driver.calls_for(DriverAction::Join).await,
        vec![DriverCall::Join {
            coordinator: node_id(0),
            address: late[0].address().clone(),
        }]
    );
}

#[tokio::test]
#[traced_test]
async fn test_unready_primary_is_kept_without_failover() {
    let cluster = TestCluster::with_config(
        ClusterConfig {
            failover_unhealthy_primary: false,
            ..ClusterConfig::default()
        },
        MockClusterDriver::new(),
    );
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes).await;

    nodes[0].set_signal(SignalId::ServiceUp, false);

    assert_matches!(
        cluster.controller.reconcile_all().await,
        Ok(ReconcileOutcome::Reconciled { joined, left, .. }) if joined.is_empty() && left.is_empty()
    );
    assert_eq!(cluster.controller.primary_node_id(), Some(node_id(0)));
    assert!(cluster.driver.calls().await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_recover_failed_node_through_sponsor() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes[..2]).await;

    cluster
        .controller
        .recover_failed_node(&node_id(1), &node_id(0))
        .await
        .unwrap();

    assert_eq!(
        cluster.driver.calls().await,
        vec![DriverCall::RecoverFailedNode {
            failed: node_id(1),
            sponsor: node_id(0),
        }]
    );
    assert!(nodes[1].is_active_member());
    assert_eq!(cluster.controller.active_member_count(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_recover_validates_nodes() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(3);
    cluster.form(&nodes[..2]).await;

    assert_matches!(
        cluster
            .controller
            .recover_failed_node(&NodeId::new("missing"), &node_id(0))
            .await,
        Err(Error::UnknownNode(id)) if id == NodeId::new("missing")
    );

    // Inactive members cannot sponsor.
    assert_matches!(
        cluster
            .controller
            .recover_failed_node(&node_id(1), &node_id(2))
            .await,
        Err(Error::UnknownNode(id)) if id == node_id(2)
    );

    assert_matches!(
        cluster
            .controller
            .recover_failed_node(&node_id(0), &node_id(0))
            .await,
        Err(Error::RecoveryFailed { .. })
    );

    nodes[0].set_signal(SignalId::ServiceUp, false);
    assert_matches!(
        cluster
            .controller
            .recover_failed_node(&node_id(1), &node_id(0))
            .await,
        Err(Error::RecoveryFailed { cause, .. }) if cause.contains("not ready")
    );

    assert!(cluster.driver.calls().await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_recover_driver_failure() {
    let cluster = TestCluster::new(3);
    let nodes = cluster.add_nodes(2);
    cluster.form(&nodes).await;

    cluster
        .driver
        .fail_next(DriverAction::RecoverFailedNode)
        .await;

    assert_matches!(
        cluster
            .controller
            .recover_failed_node(&node_id(1), &node_id(0))
            .await,
        Err(Error::RecoveryFailed { failed, sponsor, .. })
            if failed == node_id(1) && sponsor == node_id(0)
    );

    // Not retried by later passes.
    cluster.controller.reconcile_all().await.unwrap();
    assert_eq!(
        cluster
            .driver
            .calls_for(DriverAction::RecoverFailedNode)
            .await
            .len(),
        1
    );
}
