use proven_cluster_driver::{ClusterDriverError, ClusterDriverErrorKind, DriverAction, NodeAddress};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The node already serves a cluster pool.
    #[error("{0} is already initialized")]
    AlreadyInitialized(NodeAddress),

    /// The joining node is already part of the cluster.
    #[error("{0} is already part of the cluster")]
    AlreadyMember(NodeAddress),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The REST API answered with a non-success status.
    #[error("{action} rejected by {address} ({status}): {body}")]
    Rejected {
        /// The action that was attempted.
        action: DriverAction,
        /// The node that rejected it.
        address: NodeAddress,
        /// HTTP status code of the response.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The addressed node is not listed in the cluster pool.
    #[error("{address} is not a member of the cluster")]
    NotAMember {
        /// The action that was attempted.
        action: DriverAction,
        /// The node that could not be found.
        address: NodeAddress,
    },

    /// The node is the only member left and cannot be ejected.
    #[error("{0} is the last remaining member")]
    LastMember(NodeAddress),

    /// The node could not be reached.
    #[error("cannot reach {address}: {source}")]
    Unreachable {
        /// The node that could not be reached.
        address: NodeAddress,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request failed or the response could not be decoded.
    #[error("{action} request to {address} failed: {source}")]
    Http {
        /// The action that was attempted.
        action: DriverAction,
        /// The node the request was sent to.
        address: NodeAddress,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
}

impl ClusterDriverError for Error {
    fn kind(&self) -> ClusterDriverErrorKind {
        match self {
            Self::AlreadyInitialized(_) => ClusterDriverErrorKind::BootstrapFailed,
            Self::AlreadyMember(_) => ClusterDriverErrorKind::AlreadyMember,
            Self::LastMember(_) => ClusterDriverErrorKind::LeaveRejected,
            Self::Client(_) => ClusterDriverErrorKind::Other,
            Self::Unreachable { .. } => ClusterDriverErrorKind::Unreachable,
            Self::Rejected { action, .. }
            | Self::NotAMember { action, .. }
            | Self::Http { action, .. } => kind_for(*action),
        }
    }
}

const fn kind_for(action: DriverAction) -> ClusterDriverErrorKind {
    match action {
        DriverAction::InitializeCoordinator => ClusterDriverErrorKind::BootstrapFailed,
        DriverAction::Join => ClusterDriverErrorKind::JoinRejected,
        DriverAction::Leave => ClusterDriverErrorKind::LeaveRejected,
        DriverAction::Commit => ClusterDriverErrorKind::CommitFailed,
        DriverAction::Rebalance => ClusterDriverErrorKind::RebalanceFailed,
        DriverAction::RecoverFailedNode => ClusterDriverErrorKind::RecoveryFailed,
    }
}
