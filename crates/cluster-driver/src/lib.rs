//! Abstract interface for driving the membership of a clustered backing service.
//!
//! One implementation exists per backing technology. Every operation is addressed
//! at a specific node and is executed remotely, so calls may block for seconds.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod target;

pub use error::{ClusterDriverError, ClusterDriverErrorKind};
pub use target::{Credentials, NodeAddress, NodeId, NodeTarget};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The administrative actions a driver can perform against a backing cluster.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverAction {
    /// Bootstrap a standalone coordinator.
    InitializeCoordinator,

    /// Admit a node into the backing cluster.
    Join,

    /// Remove a node from the backing cluster.
    Leave,

    /// Durably apply a staged membership plan.
    Commit,

    /// Redistribute data after a topology change.
    Rebalance,

    /// Evict a failed node and restart it fresh.
    RecoverFailedNode,
}

impl DriverAction {
    /// Returns the kebab-case name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InitializeCoordinator => "initialize-coordinator",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Commit => "commit",
            Self::Rebalance => "rebalance",
            Self::RecoverFailedNode => "recover-failed-node",
        }
    }
}

impl fmt::Display for DriverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trait representing a per-technology cluster driver with asynchronous operations.
///
/// Administrative actions are routed through a coordinator node (normally the
/// cluster's primary). Implementations must not assume any ordering between calls
/// for different nodes.
#[async_trait]
pub trait ClusterDriver
where
    Self: Send + Sync + 'static,
{
    /// The error type for driver operations.
    type Error: ClusterDriverError;

    /// Get the name of the backing technology.
    fn name(&self) -> &str;

    /// Whether join and leave operations are staged and only take effect after
    /// an explicit [`commit`](Self::commit).
    fn stages_membership_changes(&self) -> bool {
        false
    }

    /// Bootstraps `node` as a standalone coordinator.
    ///
    /// # Errors
    ///
    /// Fails with a `BootstrapFailed` kind if the node is already initialized or
    /// unreachable.
    async fn initialize_coordinator(&self, node: &NodeTarget) -> Result<(), Self::Error>;

    /// Instructs the backing cluster, via `coordinator`, to admit `new_node`.
    ///
    /// # Errors
    ///
    /// Fails with an `AlreadyMember` kind if the node is already part of the
    /// backing cluster, and with a `JoinRejected` kind if the credentials are
    /// invalid.
    async fn join(
        &self,
        coordinator: &NodeTarget,
        new_node: &NodeAddress,
        credentials: &Credentials,
    ) -> Result<(), Self::Error>;

    /// Removes `leaving` from the backing cluster's membership, via `coordinator`.
    ///
    /// # Errors
    ///
    /// Fails with a `LeaveRejected` kind if `leaving` is the last remaining member.
    async fn leave(&self, coordinator: &NodeTarget, leaving: &NodeTarget)
    -> Result<(), Self::Error>;

    /// Durably applies any staged membership changes.
    ///
    /// # Errors
    ///
    /// Fails with a `CommitFailed` kind if the plan cannot be applied.
    async fn commit(&self, coordinator: &NodeTarget) -> Result<(), Self::Error>;

    /// Redistributes data after a topology change. Best-effort.
    ///
    /// # Errors
    ///
    /// Fails with a `RebalanceFailed` kind; callers treat this as non-fatal.
    async fn rebalance(&self, coordinator: &NodeTarget) -> Result<(), Self::Error>;

    /// Marks `failed` permanently down, has `sponsor` evict it from the ring, and
    /// brings `failed` back as a fresh member.
    ///
    /// # Errors
    ///
    /// Fails with a `RecoveryFailed` kind if any step of the procedure fails.
    async fn recover_failed_node(
        &self,
        failed: &NodeTarget,
        sponsor: &NodeTarget,
    ) -> Result<(), Self::Error>;
}
