//! Membership control for clustered backing services.
//!
//! A [`MemberGroup`] holds the nodes a cluster should consist of. External pollers
//! report node health through [`Node::set_signal`], which publishes on the
//! group's [`HealthSignalBus`]. A [`MembershipTracker`] filters those
//! notifications and dispatches reconciliation passes to a [`ClusterController`],
//! which elects a primary and joins or removes members through a
//! [`ClusterDriver`](proven_cluster_driver::ClusterDriver).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod controller;
mod error;
mod group;
mod node;
mod signal;
mod tracker;

pub use config::{ClusterConfig, TrackerConfig};
pub use controller::{ClusterController, ClusterStatus, ReconcileOutcome, ReconcilePhase};
pub use error::Error;
pub use group::MemberGroup;
pub use node::{Node, NodeOptions};
pub use signal::{GroupEvent, HealthSignalBus, SignalId};
pub use tracker::MembershipTracker;

pub use proven_cluster_driver::{Credentials, NodeAddress, NodeId};
