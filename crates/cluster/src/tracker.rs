//! Turns group notifications into reconciliation passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use proven_cluster_driver::{ClusterDriver, NodeId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::controller::ClusterController;
use crate::error::Error;
use crate::node::Node;
use crate::signal::{GroupEvent, HealthSignalBus, SignalId};

/// How long `shutdown` waits for the listener task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bootable state for the listener task
struct BootableState {
    listener_task: Option<JoinHandle<()>>,
    shutdown_signal: Option<oneshot::Sender<()>>,
}

struct TrackerInner<D>
where
    D: ClusterDriver,
{
    controller: Arc<ClusterController<D>>,
    config: RwLock<TrackerConfig>,
    /// Last value seen per node and signal.
    last_seen: Mutex<HashMap<NodeId, HashMap<SignalId, bool>>>,
    dispatched: AtomicU64,
}

/// Filters group notifications and dispatches each accepted one to the controller
/// as an independent task.
///
/// The callbacks never run a pass inline, so they are safe to call while the
/// group's membership lock is held.
pub struct MembershipTracker<D>
where
    D: ClusterDriver,
{
    bus: HealthSignalBus,
    inner: Arc<TrackerInner<D>>,
    bootable_state: tokio::sync::Mutex<BootableState>,
}

impl<D> MembershipTracker<D>
where
    D: ClusterDriver,
{
    /// Creates a tracker. Nothing is received from `bus` until [`start`](Self::start).
    pub fn new(
        bus: HealthSignalBus,
        controller: Arc<ClusterController<D>>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            bus,
            inner: Arc::new(TrackerInner {
                controller,
                config: RwLock::new(config),
                last_seen: Mutex::new(HashMap::new()),
                dispatched: AtomicU64::new(0),
            }),
            bootable_state: tokio::sync::Mutex::new(BootableState {
                listener_task: None,
                shutdown_signal: None,
            }),
        }
    }

    /// Replaces the signal filter.
    pub fn configure(&self, signals_of_interest: HashSet<SignalId>, notify_on_duplicate_value: bool) {
        *self.inner.config.write() = TrackerConfig {
            signals_of_interest,
            notify_on_duplicate_value,
        };
    }

    /// Starts receiving notifications from the bus.
    pub async fn start(&self) -> Result<(), Error> {
        let mut bootable_state = self.bootable_state.lock().await;
        if bootable_state.listener_task.is_some() {
            return Err(Error::AlreadyStarted);
        }

        info!(
            "Starting membership tracker for group {}",
            self.inner.controller.group().name()
        );

        let mut receiver = self.bus.subscribe();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Membership tracker received shutdown signal");
                        break;
                    }
                    event = receiver.recv() => match event {
                        Ok(GroupEvent::Added(node)) => {
                            inner.on_added(&node);
                        }
                        Ok(GroupEvent::Removed(node)) => {
                            inner.on_removed(&node);
                        }
                        Ok(GroupEvent::Changed { node, signal, value }) => {
                            inner.on_changed(&node, signal, value);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Membership tracker missed {} notifications, reconciling fully", missed);
                            inner.dispatch_full();
                        }
                        Err(RecvError::Closed) => {
                            debug!("Health signal bus closed");
                            break;
                        }
                    }
                }
            }
        });

        bootable_state.listener_task = Some(task);
        bootable_state.shutdown_signal = Some(shutdown_tx);

        Ok(())
    }

    /// Stops receiving notifications. Passes already dispatched run to completion.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let mut bootable_state = self.bootable_state.lock().await;
        let Some(task) = bootable_state.listener_task.take() else {
            return Err(Error::NotStarted);
        };

        info!(
            "Shutting down membership tracker for group {}",
            self.inner.controller.group().name()
        );

        if let Some(shutdown_signal) = bootable_state.shutdown_signal.take() {
            let _ = shutdown_signal.send(());
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => debug!("Membership tracker task completed"),
            Ok(Err(e)) => warn!("Membership tracker task failed: {}", e),
            Err(_) => warn!("Membership tracker task timed out"),
        }

        Ok(())
    }

    /// A node joined the group.
    pub fn on_added(&self, node: &Arc<Node>) -> bool {
        self.inner.on_added(node)
    }

    /// A node left the group.
    pub fn on_removed(&self, node: &Arc<Node>) -> bool {
        self.inner.on_removed(node)
    }

    /// A node reported a health signal. Returns whether a pass was dispatched.
    pub fn on_changed(&self, node: &Arc<Node>, signal: SignalId, value: bool) -> bool {
        self.inner.on_changed(node, signal, value)
    }

    /// Number of passes dispatched so far.
    pub fn dispatched_count(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }
}

impl<D> TrackerInner<D>
where
    D: ClusterDriver,
{
    fn on_added(&self, node: &Arc<Node>) -> bool {
        let seen = SignalId::ALL
            .into_iter()
            .map(|signal| (signal, node.signal(signal)))
            .collect();
        self.last_seen.lock().insert(node.node_id().clone(), seen);

        self.dispatch(node.node_id().clone());
        true
    }

    fn on_removed(&self, node: &Arc<Node>) -> bool {
        self.last_seen.lock().remove(node.node_id());

        self.dispatch(node.node_id().clone());
        true
    }

    fn on_changed(&self, node: &Arc<Node>, signal: SignalId, value: bool) -> bool {
        let (interested, notify_on_duplicate_value) = {
            let config = self.config.read();
            (
                config.signals_of_interest.contains(&signal),
                config.notify_on_duplicate_value,
            )
        };

        if !interested {
            return false;
        }

        // Late reports from pollers of removed nodes are not cached.
        let in_group = self.controller.group().contains(node.node_id());
        let previous = {
            let mut last_seen = self.last_seen.lock();
            if in_group || last_seen.contains_key(node.node_id()) {
                last_seen
                    .entry(node.node_id().clone())
                    .or_default()
                    .insert(signal, value)
            } else {
                None
            }
        };

        if !notify_on_duplicate_value && previous == Some(value) {
            debug!(
                "Ignoring unchanged {} = {} from {}",
                signal,
                value,
                node.node_id()
            );
            return false;
        }

        self.dispatch(node.node_id().clone());
        true
    }

    fn dispatch(&self, node_id: NodeId) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::clone(&self.controller);

        tokio::spawn(async move {
            match controller.on_membership_event(&node_id).await {
                Ok(outcome) => debug!("Reconciliation after {} finished: {:?}", node_id, outcome),
                Err(e) => error!("Reconciliation after {} failed: {}", node_id, e),
            }
        });
    }

    fn dispatch_full(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::clone(&self.controller);

        tokio::spawn(async move {
            if let Err(e) = controller.reconcile_all().await {
                error!("Full reconciliation failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::group::MemberGroup;
    use crate::node::tests::options;
    use proven_cluster_driver_mock::MockClusterDriver;

    fn tracker(config: TrackerConfig) -> (MembershipTracker<MockClusterDriver>, Arc<MemberGroup>) {
        let bus = HealthSignalBus::default();
        let group = Arc::new(MemberGroup::new("test", bus.clone()));
        let controller = Arc::new(ClusterController::new(
            ClusterConfig::default(),
            Arc::clone(&group),
            MockClusterDriver::new(),
        ));
        (MembershipTracker::new(bus, controller, config), group)
    }

    #[tokio::test]
    async fn test_ignores_signals_out_of_interest() {
        let (tracker, group) = tracker(TrackerConfig::default());
        tracker.configure([SignalId::ServiceUp].into_iter().collect(), false);
        let node = group.add_member(options("a", 1));

        assert!(!tracker.on_changed(&node, SignalId::ControllerProcessRunning, true));
        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert_eq!(tracker.dispatched_count(), 1);
    }

    #[tokio::test]
    async fn test_suppresses_duplicate_values() {
        let (tracker, group) = tracker(TrackerConfig::default());
        let node = group.add_member(options("a", 1));

        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert!(!tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert!(tracker.on_changed(&node, SignalId::ServiceUp, false));
        assert_eq!(tracker.dispatched_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_pass_when_configured() {
        let (tracker, group) = tracker(TrackerConfig {
            notify_on_duplicate_value: true,
            ..TrackerConfig::default()
        });
        let node = group.add_member(options("a", 1));

        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert_eq!(tracker.dispatched_count(), 2);
    }

    #[tokio::test]
    async fn test_added_seeds_and_removed_purges_cache() {
        let (tracker, group) = tracker(TrackerConfig::default());
        let node = group.add_member(options("a", 1));

        assert!(tracker.on_added(&node));
        // Matches the value seeded on add.
        assert!(!tracker.on_changed(&node, SignalId::ServiceUp, false));

        assert!(tracker.on_removed(&node));
        assert!(tracker.on_changed(&node, SignalId::ServiceUp, false));
        assert_eq!(tracker.dispatched_count(), 3);
    }

    #[tokio::test]
    async fn test_reports_after_removal_are_not_cached() {
        let (tracker, group) = tracker(TrackerConfig::default());
        let node = group.add_member(options("a", 1));
        assert!(tracker.on_added(&node));

        group.remove_member(node.node_id());
        assert!(tracker.on_removed(&node));
        assert!(tracker.inner.last_seen.lock().is_empty());

        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert!(tracker.on_changed(&node, SignalId::ServiceUp, true));
        assert!(tracker.inner.last_seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (tracker, _group) = tracker(TrackerConfig::default());

        assert!(matches!(tracker.shutdown().await, Err(Error::NotStarted)));
        tracker.start().await.unwrap();
        assert!(matches!(tracker.start().await, Err(Error::AlreadyStarted)));
        tracker.shutdown().await.unwrap();

        // Restartable after shutdown.
        tracker.start().await.unwrap();
        tracker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lagged_receiver_dispatches_full_pass() {
        let bus = HealthSignalBus::new(1);
        let group = Arc::new(MemberGroup::new("test", bus.clone()));
        let controller = Arc::new(ClusterController::new(
            ClusterConfig::default(),
            Arc::clone(&group),
            MockClusterDriver::new(),
        ));
        let tracker = MembershipTracker::new(bus, controller, TrackerConfig::default());
        tracker.start().await.unwrap();

        // The listener cannot run before the next yield, so only the last of these fits.
        for port in 1..=4 {
            group.add_member(options(&format!("n{port}"), port));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while tracker.dispatched_count() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // One full pass for the three missed notifications, one for the last add.
        assert_eq!(tracker.dispatched_count(), 2);

        tracker.shutdown().await.unwrap();
    }
}
