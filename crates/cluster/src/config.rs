//! Controller and tracker configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signal::SignalId;

/// Default number of members a cluster aims for.
const DEFAULT_DESIRED_SIZE: usize = 3;

/// Default bound on a single driver call.
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for a `ClusterController`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Target member count.
    pub desired_size: usize,

    /// Explicit quorum. Ignored unless positive.
    pub quorum: Option<usize>,

    /// Bound on every driver call, e.g. `"90s"` or `"2m"`.
    #[serde(with = "serde_duration")]
    pub action_timeout: Duration,

    /// Health signal that qualifies a member for election and for joining.
    pub readiness_signal: SignalId,

    /// Hand the primary role to another joined member when the primary stops being ready.
    pub failover_unhealthy_primary: bool,
}

impl ClusterConfig {
    /// Effective quorum: the explicit override if positive, else a strict majority of
    /// the desired size.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.quorum
            .filter(|quorum| *quorum > 0)
            .unwrap_or(self.desired_size / 2 + 1)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            desired_size: DEFAULT_DESIRED_SIZE,
            quorum: None,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            readiness_signal: SignalId::ServiceUp,
            failover_unhealthy_primary: true,
        }
    }
}

/// Configuration for a `MembershipTracker`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Signals whose changes trigger reconciliation.
    pub signals_of_interest: HashSet<SignalId>,

    /// Trigger reconciliation even when a signal is re-reported with its last value.
    pub notify_on_duplicate_value: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            signals_of_interest: SignalId::ALL.into_iter().collect(),
            notify_on_duplicate_value: false,
        }
    }
}

mod serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quorum_is_majority() {
        for (desired_size, expected) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)] {
            let config = ClusterConfig {
                desired_size,
                ..ClusterConfig::default()
            };
            assert_eq!(config.quorum(), expected, "desired size {desired_size}");
        }
    }

    #[test]
    fn test_explicit_quorum_only_if_positive() {
        let mut config = ClusterConfig {
            desired_size: 5,
            quorum: Some(1),
            ..ClusterConfig::default()
        };
        assert_eq!(config.quorum(), 1);

        config.quorum = Some(0);
        assert_eq!(config.quorum(), 3);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ClusterConfig = serde_json::from_str(
            r#"{ "desired_size": 5, "action_timeout": "2m", "readiness_signal": "controller-process-running" }"#,
        )
        .unwrap();

        assert_eq!(config.desired_size, 5);
        assert_eq!(config.action_timeout, Duration::from_secs(120));
        assert_eq!(config.readiness_signal, SignalId::ControllerProcessRunning);
        assert!(config.failover_unhealthy_primary);
        assert_eq!(config.quorum, None);
    }

    #[test]
    fn test_tracker_defaults_watch_all_signals() {
        let config: TrackerConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.signals_of_interest.len(), SignalId::ALL.len());
        assert!(!config.notify_on_duplicate_value);
    }
}
