use std::error::Error;
use std::fmt::{self, Debug};

/// Marker trait for `ClusterDriver` errors
pub trait ClusterDriverError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> ClusterDriverErrorKind;
}

/// The kind of cluster driver error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterDriverErrorKind {
    /// The node is already initialized or could not be bootstrapped.
    BootstrapFailed,

    /// The join was refused, e.g. for invalid credentials.
    JoinRejected,

    /// The joining node is already part of the backing cluster.
    AlreadyMember,

    /// No safe removal is possible (e.g. last remaining member).
    LeaveRejected,

    /// A staged membership plan could not be applied.
    CommitFailed,

    /// Data redistribution failed.
    RebalanceFailed,

    /// The failed-node recovery procedure did not complete.
    RecoveryFailed,

    /// The addressed node could not be reached.
    Unreachable,

    /// Other/unknown error
    Other,
}

impl fmt::Display for ClusterDriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
