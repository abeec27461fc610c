use serde::Deserialize;

/// Response of `GET /pools/default`.
#[derive(Clone, Debug, Deserialize)]
pub struct PoolDetails {
    pub nodes: Vec<PoolNode>,
}

/// A single node entry in the cluster pool.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolNode {
    /// `host:port` of the node's administrative interface.
    pub hostname: String,
    /// Erlang node name used by the controller endpoints.
    pub otp_node: String,
}
