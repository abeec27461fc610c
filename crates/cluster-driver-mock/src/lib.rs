//! In-memory simulated cluster driver for testing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proven_cluster_driver::{
    ClusterDriver, Credentials, DriverAction, NodeAddress, NodeId, NodeTarget,
};
use tokio::sync::Mutex;
use tracing::debug;

/// A driver call as observed by the mock.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverCall {
    /// `initialize_coordinator` was called on `node`.
    InitializeCoordinator {
        /// The node being bootstrapped.
        node: NodeId,
    },

    /// `join` was called through `coordinator` for `address`.
    Join {
        /// The coordinator the call was routed through.
        coordinator: NodeId,
        /// The address being admitted.
        address: NodeAddress,
    },

    /// `leave` was called through `coordinator` for `leaving`.
    Leave {
        /// The coordinator the call was routed through.
        coordinator: NodeId,
        /// The node being removed.
        leaving: NodeId,
    },

    /// `commit` was called through `coordinator`.
    Commit {
        /// The coordinator the call was routed through.
        coordinator: NodeId,
    },

    /// `rebalance` was called through `coordinator`.
    Rebalance {
        /// The coordinator the call was routed through.
        coordinator: NodeId,
    },

    /// `recover_failed_node` was called for `failed` sponsored by `sponsor`.
    RecoverFailedNode {
        /// The failed node.
        failed: NodeId,
        /// The healthy sponsor.
        sponsor: NodeId,
    },
}

impl DriverCall {
    /// Returns the action this call performed.
    #[must_use]
    pub const fn action(&self) -> DriverAction {
        match self {
            Self::InitializeCoordinator { .. } => DriverAction::InitializeCoordinator,
            Self::Join { .. } => DriverAction::Join,
            Self::Leave { .. } => DriverAction::Leave,
            Self::Commit { .. } => DriverAction::Commit,
            Self::Rebalance { .. } => DriverAction::Rebalance,
            Self::RecoverFailedNode { .. } => DriverAction::RecoverFailedNode,
        }
    }
}

#[derive(Clone, Debug)]
enum PlannedChange {
    Join(NodeAddress),
    Leave(NodeAddress),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<DriverCall>,
    initialized: HashSet<NodeAddress>,
    members: HashSet<NodeAddress>,
    plan: Vec<PlannedChange>,
    fail_next: HashMap<DriverAction, usize>,
    fail_always: HashSet<DriverAction>,
    rejected_addresses: HashSet<NodeAddress>,
    expected_credentials: Option<Credentials>,
    latency: Duration,
}

impl State {
    fn take_injected_failure(&mut self, action: DriverAction) -> Result<(), Error> {
        if self.fail_always.contains(&action) {
            return Err(Error::Injected(action));
        }

        if let Some(remaining) = self.fail_next.get_mut(&action) {
            *remaining -= 1;
            if *remaining == 0 {
                self.fail_next.remove(&action);
            }
            return Err(Error::Injected(action));
        }

        Ok(())
    }

    // Membership as it will look once the staged plan is committed.
    fn effective_members(&self) -> HashSet<NodeAddress> {
        let mut members = self.members.clone();
        for change in &self.plan {
            match change {
                PlannedChange::Join(address) => {
                    members.insert(address.clone());
                }
                PlannedChange::Leave(address) => {
                    members.remove(address);
                }
            }
        }
        members
    }
}

/// Simulated backing cluster that records every driver call.
#[derive(Clone, Debug, Default)]
pub struct MockClusterDriver {
    state: Arc<Mutex<State>>,
    staged: bool,
}

impl MockClusterDriver {
    /// Creates a driver whose joins and leaves take effect immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver whose joins and leaves are staged until `commit`.
    #[must_use]
    pub fn staged() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            staged: true,
        }
    }

    /// Rejects joins whose credentials differ from `credentials`.
    pub async fn expect_credentials(&self, credentials: Credentials) {
        self.state.lock().await.expected_credentials = Some(credentials);
    }

    /// Returns every call observed so far, in call order.
    pub async fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().await.calls.clone()
    }

    /// Returns the calls observed so far for a single action.
    pub async fn calls_for(&self, action: DriverAction) -> Vec<DriverCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.action() == action)
            .cloned()
            .collect()
    }

    /// Forgets all recorded calls.
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Makes the next call of `action` fail.
    pub async fn fail_next(&self, action: DriverAction) {
        *self.state.lock().await.fail_next.entry(action).or_insert(0) += 1;
    }

    /// Makes every call of `action` fail until [`clear_failures`](Self::clear_failures).
    pub async fn fail_always(&self, action: DriverAction) {
        self.state.lock().await.fail_always.insert(action);
    }

    /// Rejects every join of `address`.
    pub async fn reject_join(&self, address: NodeAddress) {
        self.state.lock().await.rejected_addresses.insert(address);
    }

    /// Removes all injected failures.
    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.fail_next.clear();
        state.fail_always.clear();
        state.rejected_addresses.clear();
    }

    /// Delays every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Returns the committed membership of the simulated cluster.
    pub async fn members(&self) -> HashSet<NodeAddress> {
        self.state.lock().await.members.clone()
    }

    /// Returns the number of uncommitted staged changes.
    pub async fn pending_changes(&self) -> usize {
        self.state.lock().await.plan.len()
    }

    /// Returns whether `address` has been bootstrapped as a coordinator.
    pub async fn is_initialized(&self, address: &NodeAddress) -> bool {
        self.state.lock().await.initialized.contains(address)
    }

    async fn record(&self, call: DriverCall) -> Duration {
        debug!("mock driver call: {:?}", call);
        let mut state = self.state.lock().await;
        state.calls.push(call);
        state.latency
    }

    async fn simulate_latency(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClusterDriver for MockClusterDriver {
    type Error = Error;

    fn name(&self) -> &str {
        "mock"
    }

    fn stages_membership_changes(&self) -> bool {
        self.staged
    }

    async fn initialize_coordinator(&self, node: &NodeTarget) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::InitializeCoordinator {
                node: node.node_id.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        let mut state = self.state.lock().await;
        state.take_injected_failure(DriverAction::InitializeCoordinator)?;

        if !state.initialized.insert(node.address.clone()) {
            return Err(Error::BootstrapFailed(format!(
                "{} is already initialized",
                node.address
            )));
        }

        // A freshly bootstrapped coordinator forms a new single-member cluster.
        state.plan.clear();
        state.members.clear();
        state.members.insert(node.address.clone());

        Ok(())
    }

    async fn join(
        &self,
        coordinator: &NodeTarget,
        new_node: &NodeAddress,
        credentials: &Credentials,
    ) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::Join {
                coordinator: coordinator.node_id.clone(),
                address: new_node.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        let mut state = self.state.lock().await;
        state.take_injected_failure(DriverAction::Join)?;

        if state.rejected_addresses.contains(new_node) {
            return Err(Error::JoinRejected(format!("{new_node} was refused")));
        }

        if state
            .expected_credentials
            .as_ref()
            .is_some_and(|expected| expected != credentials)
        {
            return Err(Error::JoinRejected(format!(
                "invalid credentials for {new_node}"
            )));
        }

        let members = state.effective_members();
        if !members.contains(&coordinator.address) {
            return Err(Error::JoinRejected(format!(
                "coordinator {} is not part of a cluster",
                coordinator.address
            )));
        }
        if members.contains(new_node) {
            return Err(Error::AlreadyMember(new_node.to_string()));
        }

        if self.staged {
            state.plan.push(PlannedChange::Join(new_node.clone()));
        } else {
            state.members.insert(new_node.clone());
        }

        Ok(())
    }

    async fn leave(&self, coordinator: &NodeTarget, leaving: &NodeTarget) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::Leave {
                coordinator: coordinator.node_id.clone(),
                leaving: leaving.node_id.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        let mut state = self.state.lock().await;
        state.take_injected_failure(DriverAction::Leave)?;

        let members = state.effective_members();
        if !members.contains(&leaving.address) {
            return Err(Error::LeaveRejected(format!(
                "{} is not a member",
                leaving.address
            )));
        }
        if members.len() == 1 {
            return Err(Error::LeaveRejected(format!(
                "{} is the last remaining member",
                leaving.address
            )));
        }

        if self.staged {
            state.plan.push(PlannedChange::Leave(leaving.address.clone()));
        } else {
            state.members.remove(&leaving.address);
        }

        Ok(())
    }

    async fn commit(&self, coordinator: &NodeTarget) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::Commit {
                coordinator: coordinator.node_id.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        let mut state = self.state.lock().await;
        state.take_injected_failure(DriverAction::Commit)?;

        state.members = state.effective_members();
        state.plan.clear();

        Ok(())
    }

    async fn rebalance(&self, coordinator: &NodeTarget) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::Rebalance {
                coordinator: coordinator.node_id.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        self.state
            .lock()
            .await
            .take_injected_failure(DriverAction::Rebalance)
    }

    async fn recover_failed_node(
        &self,
        failed: &NodeTarget,
        sponsor: &NodeTarget,
    ) -> Result<(), Error> {
        let latency = self
            .record(DriverCall::RecoverFailedNode {
                failed: failed.node_id.clone(),
                sponsor: sponsor.node_id.clone(),
            })
            .await;
        Self::simulate_latency(latency).await;

        let mut state = self.state.lock().await;
        state.take_injected_failure(DriverAction::RecoverFailedNode)?;

        if failed.address == sponsor.address {
            return Err(Error::RecoveryFailed(
                "a node cannot sponsor its own recovery".to_string(),
            ));
        }
        if !state.members.contains(&sponsor.address) {
            return Err(Error::RecoveryFailed(format!(
                "sponsor {} is not a member",
                sponsor.address
            )));
        }

        // Evicted from the ring, wiped, and rejoined through the sponsor.
        state.initialized.remove(&failed.address);
        state.members.insert(failed.address.clone());

        Ok(())
    }
}
