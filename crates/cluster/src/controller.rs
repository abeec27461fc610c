//! Reconciliation of a cluster's backing membership against its desired group.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use proven_cluster_driver::{
    ClusterDriver, ClusterDriverError, ClusterDriverErrorKind, DriverAction, NodeId,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::Error;
use crate::group::MemberGroup;
use crate::node::Node;

/// Where the controller's state machine stands.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePhase {
    /// No primary is assigned.
    #[default]
    NoPrimary,

    /// A candidate is being bootstrapped as coordinator.
    ElectingPrimary,

    /// The primary is assigned but has not reported `coordinator-initialized`.
    AwaitingCoordinatorReady,

    /// The primary is initialized and membership is being reconciled.
    Reconciling,
}

/// Result of a reconciliation pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconcileOutcome {
    /// A precondition is not met yet. No driver calls were made.
    Deferred(ReconcilePhase),

    /// A primary was assigned. The pass ends here.
    Elected(NodeId),

    /// The membership delta was applied.
    Reconciled {
        /// Nodes recorded as active during this pass, in the order they were processed.
        joined: Vec<NodeId>,
        /// Nodes removed from the backing cluster during this pass.
        left: Vec<NodeId>,
        /// Whether staged changes were committed.
        committed: bool,
        /// Whether a rebalance completed.
        rebalanced: bool,
    },
}

/// Read-only view of a cluster for upstream health aggregation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClusterStatus {
    /// Whether the cluster is serviceable.
    pub service_up: bool,
    /// Number of members joined into the backing cluster.
    pub active_member_count: usize,
    /// Current primary, if any.
    pub primary: Option<NodeId>,
    /// Phase reached by the last pass.
    pub phase: ReconcilePhase,
    /// Number of nodes in the desired group.
    pub member_count: usize,
    /// Effective quorum.
    pub quorum: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    active: IndexMap<NodeId, Arc<Node>>,
    primary: Option<Arc<Node>>,
    pending_commit: bool,
    phase: ReconcilePhase,
}

#[derive(Clone, Debug, Default)]
struct Snapshot {
    active_member_count: usize,
    primary: Option<NodeId>,
    phase: ReconcilePhase,
}

/// Drives a backing cluster towards the membership of a `MemberGroup`.
///
/// Every pass re-reads the full state, so passes may be triggered by any event in
/// any order. Passes for one controller run one at a time.
pub struct ClusterController<D>
where
    D: ClusterDriver,
{
    config: ClusterConfig,
    driver: D,
    group: Arc<MemberGroup>,
    /// Reconciliation lock. Held across driver calls.
    state: Mutex<ClusterState>,
    /// Published at the end of every pass so status reads never wait on a pass.
    snapshot: RwLock<Snapshot>,
}

impl<D> ClusterController<D>
where
    D: ClusterDriver,
{
    /// Creates a controller for `group` with no primary.
    pub fn new(config: ClusterConfig, group: Arc<MemberGroup>, driver: D) -> Self {
        info!(
            "Creating cluster controller for group {} using {} driver (desired size {}, quorum {})",
            group.name(),
            driver.name(),
            config.desired_size,
            config.quorum()
        );

        Self {
            config,
            driver,
            group,
            state: Mutex::new(ClusterState::default()),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Returns the controller's configuration.
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Returns the driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Returns the desired group.
    pub const fn group(&self) -> &Arc<MemberGroup> {
        &self.group
    }

    /// Runs one reconciliation pass in response to an event about `triggering`.
    ///
    /// The node only identifies the trigger in logs. The pass itself considers the
    /// whole group.
    pub async fn on_membership_event(
        &self,
        triggering: &NodeId,
    ) -> Result<ReconcileOutcome, Error> {
        debug!(
            "Membership event from {} in group {}",
            triggering,
            self.group.name()
        );
        self.reconcile().await
    }

    /// Runs one reconciliation pass without a triggering node.
    pub async fn reconcile_all(&self) -> Result<ReconcileOutcome, Error> {
        debug!("Full reconciliation of group {}", self.group.name());
        self.reconcile().await
    }

    /// Evicts `failed` from the backing cluster and restarts it fresh through `sponsor`.
    ///
    /// The sponsor must be an active, ready member. Not retried on failure.
    pub async fn recover_failed_node(&self, failed: &NodeId, sponsor: &NodeId) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        let sponsor_node = state
            .active
            .get(sponsor)
            .filter(|_| self.group.contains(sponsor))
            .cloned()
            .ok_or_else(|| Error::UnknownNode(sponsor.clone()))?;
        let failed_node = self
            .group
            .get(failed)
            .or_else(|| state.active.get(failed).cloned())
            .ok_or_else(|| Error::UnknownNode(failed.clone()))?;

        let recovery_failed = |cause: String| Error::RecoveryFailed {
            failed: failed.clone(),
            sponsor: sponsor.clone(),
            cause,
        };

        if failed == sponsor {
            return Err(recovery_failed(
                "a node cannot sponsor its own recovery".to_string(),
            ));
        }
        if !self.is_ready(&sponsor_node) {
            return Err(recovery_failed(format!("sponsor {sponsor} is not ready")));
        }

        info!(
            "Recovering {} in group {} through sponsor {}",
            failed,
            self.group.name(),
            sponsor
        );

        let failed_target = failed_node.target();
        let sponsor_target = sponsor_node.target();
        self.run_action(
            DriverAction::RecoverFailedNode,
            failed,
            self.driver
                .recover_failed_node(&failed_target, &sponsor_target),
        )
        .await
        .map_err(recovery_failed)?;

        failed_node.set_active_member(true);
        state.active.insert(failed.clone(), failed_node);
        self.publish_snapshot(&state);

        Ok(())
    }

    /// Effective quorum.
    pub fn quorum(&self) -> usize {
        self.config.quorum()
    }

    /// Number of members joined into the backing cluster.
    pub fn active_member_count(&self) -> usize {
        self.snapshot.read().active_member_count
    }

    /// Id of the current primary.
    pub fn primary_node_id(&self) -> Option<NodeId> {
        self.snapshot.read().primary.clone()
    }

    /// Phase reached by the last pass.
    pub fn phase(&self) -> ReconcilePhase {
        self.snapshot.read().phase
    }

    /// Whether the group is up and enough members are active to form a quorum.
    pub fn current_service_up(&self) -> bool {
        self.group.base_service_up() && self.active_member_count() >= self.quorum()
    }

    /// Full status snapshot.
    pub fn status(&self) -> ClusterStatus {
        let snapshot = self.snapshot.read().clone();
        let quorum = self.quorum();

        ClusterStatus {
            service_up: self.group.base_service_up() && snapshot.active_member_count >= quorum,
            active_member_count: snapshot.active_member_count,
            primary: snapshot.primary,
            phase: snapshot.phase,
            member_count: self.group.len(),
            quorum,
        }
    }

    async fn reconcile(&self) -> Result<ReconcileOutcome, Error> {
        let mut state = self.state.lock().await;
        let result = self.reconcile_locked(&mut state).await;
        self.publish_snapshot(&state);
        result
    }

    async fn reconcile_locked(&self, state: &mut ClusterState) -> Result<ReconcileOutcome, Error> {
        self.handle_primary_departure(state);

        let Some(primary) = state.primary.clone() else {
            return self.elect_primary(state).await;
        };

        if !primary.coordinator_initialized() {
            state.phase = ReconcilePhase::AwaitingCoordinatorReady;
            debug!(
                "Waiting for coordinator {} of group {} to initialize",
                primary.node_id(),
                self.group.name()
            );
            return Ok(ReconcileOutcome::Deferred(
                ReconcilePhase::AwaitingCoordinatorReady,
            ));
        }

        state.phase = ReconcilePhase::Reconciling;
        self.apply_membership_delta(state, &primary).await
    }

    fn is_ready(&self, node: &Node) -> bool {
        node.signal(self.config.readiness_signal)
    }

    fn promote(&self, state: &mut ClusterState, node: &Arc<Node>) {
        // Demote first: at most one node may report primary at any time.
        if let Some(previous) = state.primary.take() {
            previous.set_primary(false);
        }
        let members = self.group.members();
        for stale in members.iter().chain(state.active.values()) {
            if stale.node_id() != node.node_id() {
                stale.set_primary(false);
            }
        }

        node.set_primary(true);
        state.primary = Some(Arc::clone(node));
    }

    fn handle_primary_departure(&self, state: &mut ClusterState) {
        let Some(primary) = state.primary.clone() else {
            return;
        };

        let departed = !self.group.contains(primary.node_id());
        let unready =
            !departed && self.config.failover_unhealthy_primary && !self.is_ready(&primary);
        if !departed && !unready {
            return;
        }

        let candidates: Vec<Arc<Node>> = self
            .group
            .members()
            .into_iter()
            .filter(|node| {
                node.node_id() != primary.node_id()
                    && node.is_active_member()
                    && state.active.contains_key(node.node_id())
                    && self.is_ready(node)
            })
            .collect();

        // An unready primary is only replaced by a member that can coordinate
        // right away. A departed one falls back to any joined member.
        let initialized = candidates
            .iter()
            .find(|node| node.coordinator_initialized())
            .cloned();
        let successor = if departed {
            initialized.or_else(|| candidates.into_iter().next())
        } else {
            initialized
        };

        match successor {
            Some(successor) => {
                info!(
                    "Primary {} of group {} {}, failing over to {}",
                    primary.node_id(),
                    self.group.name(),
                    if departed { "left the group" } else { "is not ready" },
                    successor.node_id()
                );
                self.promote(state, &successor);
            }
            None if departed => {
                warn!(
                    "Primary {} left group {} with no joined successor",
                    primary.node_id(),
                    self.group.name()
                );
                primary.set_primary(false);
                state.primary = None;
            }
            None => {
                debug!(
                    "Primary {} of group {} is not ready but no initialized successor is available",
                    primary.node_id(),
                    self.group.name()
                );
            }
        }
    }

    async fn elect_primary(&self, state: &mut ClusterState) -> Result<ReconcileOutcome, Error> {
        let Some(candidate) = self
            .group
            .members()
            .into_iter()
            .find(|node| self.is_ready(node))
        else {
            state.phase = ReconcilePhase::NoPrimary;
            debug!(
                "No ready member in group {}, deferring election",
                self.group.name()
            );
            return Ok(ReconcileOutcome::Deferred(ReconcilePhase::NoPrimary));
        };

        state.phase = ReconcilePhase::ElectingPrimary;

        if candidate.coordinator_initialized() {
            info!(
                "Adopting initialized coordinator {} as primary of group {}",
                candidate.node_id(),
                self.group.name()
            );
        } else {
            info!(
                "Electing {} as primary of group {}",
                candidate.node_id(),
                self.group.name()
            );

            let target = candidate.target();
            if let Err(cause) = self
                .run_action(
                    DriverAction::InitializeCoordinator,
                    candidate.node_id(),
                    self.driver.initialize_coordinator(&target),
                )
                .await
            {
                state.phase = ReconcilePhase::NoPrimary;
                return Err(Error::BootstrapFailed {
                    node_id: candidate.node_id().clone(),
                    cause,
                });
            }

            // A freshly bootstrapped coordinator forms a new backing cluster.
            for node in state.active.values() {
                node.set_active_member(false);
            }
            state.active.clear();
            state.pending_commit = false;
        }

        self.promote(state, &candidate);
        state.phase = if candidate.coordinator_initialized() {
            ReconcilePhase::Reconciling
        } else {
            ReconcilePhase::AwaitingCoordinatorReady
        };

        Ok(ReconcileOutcome::Elected(candidate.node_id().clone()))
    }

    async fn apply_membership_delta(
        &self,
        state: &mut ClusterState,
        primary: &Arc<Node>,
    ) -> Result<ReconcileOutcome, Error> {
        let coordinator = primary.target();
        let staged = self.driver.stages_membership_changes();

        if !state.active.contains_key(primary.node_id()) {
            primary.set_active_member(true);
            state
                .active
                .insert(primary.node_id().clone(), Arc::clone(primary));
        }

        let members = self.group.members();
        let member_ids: HashSet<&NodeId> = members.iter().map(|node| node.node_id()).collect();

        let to_add: Vec<Arc<Node>> = members
            .iter()
            .filter(|node| self.is_ready(node) && !state.active.contains_key(node.node_id()))
            .cloned()
            .collect();
        let to_remove: Vec<Arc<Node>> = state
            .active
            .values()
            .filter(|node| {
                node.node_id() != primary.node_id()
                    && (!member_ids.contains(node.node_id()) || !self.is_ready(node))
            })
            .cloned()
            .collect();

        if to_add.is_empty() && to_remove.is_empty() {
            debug!(
                "Group {} converged with {} active members",
                self.group.name(),
                state.active.len()
            );
        }

        let mut joined = Vec::with_capacity(to_add.len());
        for node in &to_add {
            if node.is_active_member() {
                debug!("{} is already joined, recording as active", node.node_id());
            } else {
                // A join that landed before its call timed out is reported as
                // already a member on retry.
                let join = async {
                    match self
                        .driver
                        .join(&coordinator, node.address(), node.credentials())
                        .await
                    {
                        Err(e) if e.kind() == ClusterDriverErrorKind::AlreadyMember => {
                            info!(
                                "{} is already part of the backing cluster of group {}",
                                node.node_id(),
                                self.group.name()
                            );
                            Ok(())
                        }
                        result => result,
                    }
                };
                self.run_action(DriverAction::Join, node.node_id(), join)
                    .await
                    .map_err(|cause| Error::DriverActionFailed {
                        action: DriverAction::Join,
                        node_id: node.node_id().clone(),
                        cause,
                    })?;

                state.pending_commit |= staged;
                info!(
                    "Joined {} into group {} through {}",
                    node.node_id(),
                    self.group.name(),
                    primary.node_id()
                );
            }

            node.set_active_member(true);
            state
                .active
                .insert(node.node_id().clone(), Arc::clone(node));
            joined.push(node.node_id().clone());
        }

        let mut left = Vec::with_capacity(to_remove.len());
        for node in &to_remove {
            let leaving = node.target();
            self.run_action(
                DriverAction::Leave,
                node.node_id(),
                self.driver.leave(&coordinator, &leaving),
            )
            .await
            .map_err(|cause| Error::DriverActionFailed {
                action: DriverAction::Leave,
                node_id: node.node_id().clone(),
                cause,
            })?;

            state.pending_commit |= staged;
            node.set_active_member(false);
            state.active.shift_remove(node.node_id());
            left.push(node.node_id().clone());
            info!(
                "Removed {} from group {} through {}",
                node.node_id(),
                self.group.name(),
                primary.node_id()
            );
        }

        let mut committed = false;
        if staged && state.pending_commit {
            self.run_action(
                DriverAction::Commit,
                primary.node_id(),
                self.driver.commit(&coordinator),
            )
            .await
            .map_err(|cause| Error::CommitFailed { cause })?;

            state.pending_commit = false;
            committed = true;
            info!("Committed membership changes of group {}", self.group.name());
        }

        // Removal already redistributes data, so only pure growth needs a rebalance.
        let mut rebalanced = false;
        if !to_add.is_empty() && to_remove.is_empty() {
            match self
                .run_action(
                    DriverAction::Rebalance,
                    primary.node_id(),
                    self.driver.rebalance(&coordinator),
                )
                .await
            {
                Ok(()) => {
                    rebalanced = true;
                    info!("Rebalanced group {}", self.group.name());
                }
                Err(cause) => warn!(
                    "Rebalance of group {} failed, continuing: {}",
                    self.group.name(),
                    cause
                ),
            }
        }

        Ok(ReconcileOutcome::Reconciled {
            joined,
            left,
            committed,
            rebalanced,
        })
    }

    async fn run_action<F>(
        &self,
        action: DriverAction,
        node_id: &NodeId,
        call: F,
    ) -> Result<(), String>
    where
        F: Future<Output = Result<(), D::Error>>,
    {
        debug!(
            "Running {} for {} via {} driver",
            action,
            node_id,
            self.driver.name()
        );

        match tokio::time::timeout(self.config.action_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(
                    "{} for {} in group {} failed ({:?}): {}",
                    action,
                    node_id,
                    self.group.name(),
                    e.kind(),
                    e
                );
                Err(e.to_string())
            }
            Err(_) => {
                warn!(
                    "{} for {} in group {} timed out after {:?}",
                    action,
                    node_id,
                    self.group.name(),
                    self.config.action_timeout
                );
                Err(format!(
                    "timed out after {:?}",
                    self.config.action_timeout
                ))
            }
        }
    }

    fn publish_snapshot(&self, state: &ClusterState) {
        *self.snapshot.write() = Snapshot {
            active_member_count: state.active.len(),
            primary: state.primary.as_ref().map(|node| node.node_id().clone()),
            phase: state.phase,
        };
    }
}
