//! Provider lifecycle
//!
//! Cluster-scoped providers carry the cluster endpoint and an auth token, so
//! they are only usable once the cluster exists. The manager tracks this as a
//! small state machine:
//!
//! ```text
//! Uninitialized --cloud_provider()--> AwsReady --promote()--> ClusterApiReady
//! ```
//!
//! Asking for a cluster-scoped handle before promotion is an error at
//! assembly time rather than a failure halfway through an apply. The manager
//! is a plain value owned by the orchestrator; there is no global instance.

use std::fmt;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use keel_common::{Error, Expr, NodeId, ResourceGraph, ResourceNode, Result};

/// Cloud provider node
pub const CLOUD_PROVIDER_NODE: &str = "aws";
/// Cluster API provider node
pub const CLUSTER_API_PROVIDER_NODE: &str = "k8s";
/// Chart deployment provider node
pub const CHART_DEPLOY_PROVIDER_NODE: &str = "helm";

/// Where the manager is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderState {
    /// Nothing declared yet
    Uninitialized,
    /// Cloud provider declared
    AwsReady,
    /// Cluster-scoped providers declared
    ClusterApiReady,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderState::Uninitialized => "Uninitialized",
            ProviderState::AwsReady => "AwsReady",
            ProviderState::ClusterApiReady => "ClusterApiReady",
        };
        f.write_str(name)
    }
}

/// Reference to a declared provider node
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    node_id: NodeId,
}

impl ProviderHandle {
    fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
        }
    }

    /// Provider node id, for [`ResourceNode::with_provider`]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

/// Outcome of [`ProviderLifecycleManager::promote`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Promotion {
    /// This call declared the cluster-scoped providers
    Promoted {
        /// Cluster API provider
        cluster_api: ProviderHandle,
        /// Chart deployment provider
        chart_deploy: ProviderHandle,
    },
    /// Providers already existed; nothing was declared
    AlreadyPromoted,
}

/// Connection details for the cluster API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCredentials {
    /// API server endpoint
    pub endpoint: Expr,
    /// PEM CA certificate (already decoded)
    pub ca_certificate: Expr,
    /// Bearer token
    pub token: Expr,
}

/// Owns the provider handles and gates the cluster-scoped ones
#[derive(Debug)]
pub struct ProviderLifecycleManager {
    state: ProviderState,
    cloud: Option<ProviderHandle>,
    cluster_api: Option<ProviderHandle>,
    chart_deploy: Option<ProviderHandle>,
}

impl Default for ProviderLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderLifecycleManager {
    /// A manager with nothing declared
    pub fn new() -> Self {
        Self {
            state: ProviderState::Uninitialized,
            cloud: None,
            cluster_api: None,
            chart_deploy: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// The cloud provider, declared on first use
    pub fn cloud_provider(
        &mut self,
        graph: &mut ResourceGraph,
        region: &str,
    ) -> Result<ProviderHandle> {
        if let Some(handle) = &self.cloud {
            return Ok(handle.clone());
        }
        graph.add_node(
            ResourceNode::provider_config(CLOUD_PROVIDER_NODE, "aws").with_attr("region", region),
        )?;
        let handle = ProviderHandle::new(CLOUD_PROVIDER_NODE);
        self.cloud = Some(handle.clone());
        self.state = ProviderState::AwsReady;
        debug!(region = %region, state = %self.state, "declared cloud provider");
        Ok(handle)
    }

    /// Declare the cluster API and chart deployment providers
    ///
    /// Call once the cluster and its native add-ons are declared. A second
    /// call declares nothing and returns [`Promotion::AlreadyPromoted`].
    pub fn promote(
        &mut self,
        graph: &mut ResourceGraph,
        credentials: &ClusterCredentials,
    ) -> Result<Promotion> {
        match self.state {
            ProviderState::Uninitialized => {
                return Err(Error::not_initialized("cloud provider", self.state.to_string()))
            }
            ProviderState::ClusterApiReady => {
                warn!("cluster API providers already promoted, skipping");
                return Ok(Promotion::AlreadyPromoted);
            }
            ProviderState::AwsReady => {}
        }

        let cluster_api = graph.add_node(
            ResourceNode::provider_config(CLUSTER_API_PROVIDER_NODE, "kubernetes")
                .with_expr("host", &credentials.endpoint)
                .with_expr("cluster_ca_certificate", &credentials.ca_certificate)
                .with_expr("token", &credentials.token),
        )?;

        let mut chart_deploy = ResourceNode::provider_config(CHART_DEPLOY_PROVIDER_NODE, "helm")
            .with_attr(
                "kubernetes",
                json!({
                    "host": Value::from(&credentials.endpoint),
                    "cluster_ca_certificate": Value::from(&credentials.ca_certificate),
                    "token": Value::from(&credentials.token),
                }),
            );
        for expr in [&credentials.endpoint, &credentials.ca_certificate, &credentials.token] {
            chart_deploy = chart_deploy.reading(expr);
        }
        let chart_deploy = graph.add_node(chart_deploy)?;

        let cluster_api = ProviderHandle::new(&cluster_api);
        let chart_deploy = ProviderHandle::new(&chart_deploy);
        self.cluster_api = Some(cluster_api.clone());
        self.chart_deploy = Some(chart_deploy.clone());
        self.state = ProviderState::ClusterApiReady;
        info!(state = %self.state, "promoted to cluster API providers");
        Ok(Promotion::Promoted {
            cluster_api,
            chart_deploy,
        })
    }

    /// Provider for plain Kubernetes objects
    pub fn cluster_api_provider(&self) -> Result<&ProviderHandle> {
        self.gated("cluster API provider", self.cluster_api.as_ref())
    }

    /// Provider for chart releases
    pub fn chart_deploy_provider(&self) -> Result<&ProviderHandle> {
        self.gated("chart deploy provider", self.chart_deploy.as_ref())
    }

    fn gated<'a>(
        &self,
        handle: &str,
        value: Option<&'a ProviderHandle>,
    ) -> Result<&'a ProviderHandle> {
        match (self.state, value) {
            (ProviderState::ClusterApiReady, Some(handle)) => Ok(handle),
            _ => Err(Error::not_initialized(handle, self.state.to_string())),
        }
    }
}
