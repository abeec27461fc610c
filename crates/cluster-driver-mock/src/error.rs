//! Error types for the mock cluster driver implementation.

use proven_cluster_driver::{ClusterDriverError, ClusterDriverErrorKind, DriverAction};
use thiserror::Error;

/// Error type for the mock cluster driver implementation.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The node is already initialized.
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// The join was rejected by the simulated cluster.
    #[error("join rejected: {0}")]
    JoinRejected(String),

    /// The joining node is already a member of the simulated cluster.
    #[error("{0} is already a member")]
    AlreadyMember(String),

    /// The leave was rejected by the simulated cluster.
    #[error("leave rejected: {0}")]
    LeaveRejected(String),

    /// The recovery procedure was rejected by the simulated cluster.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// A failure injected by the test for the given action.
    #[error("injected {0} failure")]
    Injected(DriverAction),
}

impl ClusterDriverError for Error {
    fn kind(&self) -> ClusterDriverErrorKind {
        match self {
            Self::BootstrapFailed(_) => ClusterDriverErrorKind::BootstrapFailed,
            Self::JoinRejected(_) => ClusterDriverErrorKind::JoinRejected,
            Self::AlreadyMember(_) => ClusterDriverErrorKind::AlreadyMember,
            Self::LeaveRejected(_) => ClusterDriverErrorKind::LeaveRejected,
            Self::RecoveryFailed(_) => ClusterDriverErrorKind::RecoveryFailed,
            Self::Injected(action) => match action {
                DriverAction::InitializeCoordinator => ClusterDriverErrorKind::BootstrapFailed,
                DriverAction::Join => ClusterDriverErrorKind::JoinRejected,
                DriverAction::Leave => ClusterDriverErrorKind::LeaveRejected,
                DriverAction::Commit => ClusterDriverErrorKind::CommitFailed,
                DriverAction::Rebalance => ClusterDriverErrorKind::RebalanceFailed,
                DriverAction::RecoverFailedNode => ClusterDriverErrorKind::RecoveryFailed,
            },
        }
    }
}
