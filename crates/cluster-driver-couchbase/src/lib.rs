//! Cluster driver for Couchbase Server, using its REST administration API.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::Error;

use std::time::Duration;

use async_trait::async_trait;
use proven_cluster_driver::{ClusterDriver, Credentials, DriverAction, NodeAddress, NodeTarget};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use types::{PoolDetails, PoolNode};

/// Default memory quota given to the data service on bootstrap.
const DEFAULT_MEMORY_QUOTA_MB: u32 = 256;

/// Fragment of the `addNode` rejection for a node that already joined.
const ALREADY_MEMBER_MESSAGE: &str = "already part of cluster";

/// Default bound on a single REST request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for configuring `CouchbaseDriver`.
#[derive(Clone, Debug)]
pub struct CouchbaseDriverOptions {
    /// Memory quota (MB) for the data service of a freshly bootstrapped node.
    pub memory_quota_mb: u32,

    /// Timeout applied to every REST request.
    pub request_timeout: Duration,

    /// URL scheme of the administration interface (`http` or `https`).
    pub scheme: String,
}

impl Default for CouchbaseDriverOptions {
    fn default() -> Self {
        Self {
            memory_quota_mb: DEFAULT_MEMORY_QUOTA_MB,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            scheme: "http".to_string(),
        }
    }
}

/// Drives Couchbase cluster membership through the node administration API.
#[derive(Clone, Debug)]
pub struct CouchbaseDriver {
    client: Client,
    memory_quota_mb: u32,
    scheme: String,
}

impl CouchbaseDriver {
    /// Creates a new instance of `CouchbaseDriver`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built with the given options.
    pub fn new(
        CouchbaseDriverOptions {
            memory_quota_mb,
            request_timeout,
            scheme,
        }: CouchbaseDriverOptions,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(Error::Client)?;

        Ok(Self {
            client,
            memory_quota_mb,
            scheme,
        })
    }

    fn url(&self, address: &NodeAddress, path: &str) -> String {
        format!("{}://{}{}", self.scheme, address, path)
    }

    fn transport_error(action: DriverAction, address: &NodeAddress, source: reqwest::Error) -> Error {
        if source.is_connect() || source.is_timeout() {
            Error::Unreachable {
                address: address.clone(),
                source,
            }
        } else {
            Error::Http {
                action,
                address: address.clone(),
                source,
            }
        }
    }

    async fn post_form(
        &self,
        action: DriverAction,
        address: &NodeAddress,
        credentials: &Credentials,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<String, Error> {
        debug!("POST {} on {} ({})", path, address, action);

        let response = self
            .client
            .post(self.url(address, path))
            .basic_auth(&credentials.username, Some(&credentials.password))
            .form(form)
            .send()
            .await
            .map_err(|e| Self::transport_error(action, address, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::transport_error(action, address, e))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(Error::Rejected {
                action,
                address: address.clone(),
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Fetches the cluster pool, or `None` if the node does not serve one yet.
    async fn pool_details(
        &self,
        action: DriverAction,
        target: &NodeTarget,
    ) -> Result<Option<PoolDetails>, Error> {
        let response = self
            .client
            .get(self.url(&target.address, "/pools/default"))
            .basic_auth(
                &target.credentials.username,
                Some(&target.credentials.password),
            )
            .send()
            .await
            .map_err(|e| Self::transport_error(action, &target.address, e))?;

        match response.status() {
            StatusCode::OK => response
                .json::<PoolDetails>()
                .await
                .map(Some)
                .map_err(|e| Self::transport_error(action, &target.address, e)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Rejected {
                action,
                address: target.address.clone(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn require_pool(
        &self,
        action: DriverAction,
        coordinator: &NodeTarget,
    ) -> Result<PoolDetails, Error> {
        self.pool_details(action, coordinator)
            .await?
            .ok_or_else(|| Error::NotAMember {
                action,
                address: coordinator.address.clone(),
            })
    }

    async fn start_rebalance(
        &self,
        action: DriverAction,
        coordinator: &NodeTarget,
        nodes: &[PoolNode],
        ejected: Option<&PoolNode>,
    ) -> Result<(), Error> {
        let known_nodes = nodes
            .iter()
            .map(|node| node.otp_node.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let ejected_nodes = ejected.map_or("", |node| node.otp_node.as_str());

        self.post_form(
            action,
            &coordinator.address,
            &coordinator.credentials,
            "/controller/rebalance",
            &[
                ("knownNodes", known_nodes.as_str()),
                ("ejectedNodes", ejected_nodes),
            ],
        )
        .await
        .map(|_| ())
    }
}

fn find_node<'a>(pool: &'a PoolDetails, address: &NodeAddress) -> Option<&'a PoolNode> {
    let hostname = address.to_string();
    pool.nodes.iter().find(|node| node.hostname == hostname)
}

#[async_trait]
impl ClusterDriver for CouchbaseDriver {
    type Error = Error;

    fn name(&self) -> &str {
        "couchbase"
    }

    async fn initialize_coordinator(&self, node: &NodeTarget) -> Result<(), Error> {
        let action = DriverAction::InitializeCoordinator;

        if self.pool_details(action, node).await?.is_some() {
            return Err(Error::AlreadyInitialized(node.address.clone()));
        }

        let memory_quota = self.memory_quota_mb.to_string();
        self.post_form(
            action,
            &node.address,
            &node.credentials,
            "/pools/default",
            &[("memoryQuota", memory_quota.as_str())],
        )
        .await?;

        self.post_form(
            action,
            &node.address,
            &node.credentials,
            "/settings/web",
            &[
                ("port", "SAME"),
                ("username", node.credentials.username.as_str()),
                ("password", node.credentials.password.as_str()),
            ],
        )
        .await?;

        info!("initialized couchbase coordinator on {}", node.address);

        Ok(())
    }

    async fn join(
        &self,
        coordinator: &NodeTarget,
        new_node: &NodeAddress,
        credentials: &Credentials,
    ) -> Result<(), Error> {
        let hostname = new_node.to_string();

        match self
            .post_form(
                DriverAction::Join,
                &coordinator.address,
                &coordinator.credentials,
                "/controller/addNode",
                &[
                    ("hostname", hostname.as_str()),
                    ("user", credentials.username.as_str()),
                    ("password", credentials.password.as_str()),
                ],
            )
            .await
        {
            Ok(_) => {}
            Err(Error::Rejected {
                status: 400, body, ..
            }) if body.contains(ALREADY_MEMBER_MESSAGE) => {
                return Err(Error::AlreadyMember(new_node.clone()));
            }
            Err(e) => return Err(e),
        }

        info!("added {} to couchbase cluster via {}", new_node, coordinator.address);

        Ok(())
    }

    async fn leave(&self, coordinator: &NodeTarget, leaving: &NodeTarget) -> Result<(), Error> {
        let action = DriverAction::Leave;
        let pool = self.require_pool(action, coordinator).await?;

        let ejected = find_node(&pool, &leaving.address).ok_or_else(|| Error::NotAMember {
            action,
            address: leaving.address.clone(),
        })?;

        if pool.nodes.len() == 1 {
            return Err(Error::LastMember(leaving.address.clone()));
        }

        // Ejecting through a rebalance redistributes data as part of the removal.
        self.start_rebalance(action, coordinator, &pool.nodes, Some(ejected))
            .await?;

        info!("ejecting {} from couchbase cluster via {}", leaving.address, coordinator.address);

        Ok(())
    }

    async fn commit(&self, coordinator: &NodeTarget) -> Result<(), Error> {
        debug!(
            "couchbase applies membership changes immediately, nothing to commit on {}",
            coordinator.address
        );
        Ok(())
    }

    async fn rebalance(&self, coordinator: &NodeTarget) -> Result<(), Error> {
        let action = DriverAction::Rebalance;
        let pool = self.require_pool(action, coordinator).await?;

        self.start_rebalance(action, coordinator, &pool.nodes, None)
            .await
    }

    async fn recover_failed_node(
        &self,
        failed: &NodeTarget,
        sponsor: &NodeTarget,
    ) -> Result<(), Error> {
        let action = DriverAction::RecoverFailedNode;
        let pool = self.require_pool(action, sponsor).await?;

        let failed_node = find_node(&pool, &failed.address).ok_or_else(|| Error::NotAMember {
            action,
            address: failed.address.clone(),
        })?;

        self.post_form(
            action,
            &sponsor.address,
            &sponsor.credentials,
            "/controller/failOver",
            &[("otpNode", failed_node.otp_node.as_str())],
        )
        .await?;

        self.post_form(
            action,
            &sponsor.address,
            &sponsor.credentials,
            "/controller/setRecoveryType",
            &[
                ("otpNode", failed_node.otp_node.as_str()),
                ("recoveryType", "full"),
            ],
        )
        .await?;

        self.start_rebalance(action, sponsor, &pool.nodes, None)
            .await?;

        info!(
            "recovering {} through sponsor {}",
            failed.address, sponsor.address
        );

        Ok(())
    }
}
