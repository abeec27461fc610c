use proven_cluster_driver::{DriverAction, NodeId};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A join or leave failed or timed out. The next pass retries it.
    #[error("{action} of {node_id} failed: {cause}")]
    DriverActionFailed {
        /// The action that failed.
        action: DriverAction,
        /// The node the action concerned.
        node_id: NodeId,
        /// Description of the failure.
        cause: String,
    },

    /// The elected node could not be bootstrapped as coordinator.
    #[error("failed to bootstrap coordinator on {node_id}: {cause}")]
    BootstrapFailed {
        /// The candidate primary.
        node_id: NodeId,
        /// Description of the failure.
        cause: String,
    },

    /// Staged membership changes could not be committed.
    #[error("failed to commit membership changes: {cause}")]
    CommitFailed {
        /// Description of the failure.
        cause: String,
    },

    /// A failed node could not be recovered.
    #[error("failed to recover {failed} through {sponsor}: {cause}")]
    RecoveryFailed {
        /// The failed node.
        failed: NodeId,
        /// The sponsor the recovery went through.
        sponsor: NodeId,
        /// Description of the failure.
        cause: String,
    },

    /// The node is not known to the cluster.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The tracker is not running.
    #[error("tracker not started")]
    NotStarted,

    /// The tracker is already running.
    #[error("tracker already started")]
    AlreadyStarted,
}
