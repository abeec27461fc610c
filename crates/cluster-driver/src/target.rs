//! Addressing data handed to driver calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier of a candidate cluster member.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random node id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Network address of a node's administrative interface.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Hostname or IP address.
    pub host: String,

    /// Administrative port.
    pub admin_port: u16,
}

impl NodeAddress {
    /// Creates a new address.
    pub fn new(host: impl Into<String>, admin_port: u16) -> Self {
        Self {
            host: host.into(),
            admin_port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.admin_port)
    }
}

/// Administrative credentials for a node.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Administrative username.
    pub username: String,

    /// Administrative password.
    pub password: String,
}

impl Credentials {
    /// Creates a new set of credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a driver needs to address a single node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeTarget {
    /// The node's id.
    pub node_id: NodeId,

    /// The node's administrative address.
    pub address: NodeAddress,

    /// The node's administrative credentials.
    pub credentials: Credentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("admin", "hunter2");
        let debug = format!("{credentials:?}");

        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }

    #[test]
    fn test_address_display() {
        assert_eq!(NodeAddress::new("10.0.0.1", 8091).to_string(), "10.0.0.1:8091");
    }
}
