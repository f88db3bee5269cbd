//! Cluster context shared by identity synthesis
//!
//! Built once the cluster (and, when enabled, its federation provider) are
//! declared. Read-only afterwards; every consumer borrows it.

use keel_common::{Expr, NodeId};

use crate::arn::ArnContext;

/// Facts about the declared cluster that trust and permission documents need
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterContext {
    /// AWS region of the cluster
    pub region: String,
    /// AWS partition
    pub partition: String,
    /// Cluster name (known at assembly time)
    pub cluster_name: String,
    /// Kubernetes minor version
    pub kubernetes_version: String,
    /// Account id; late-bound unless configured
    pub account_id: Expr,
    /// OIDC issuer URL without scheme, used as condition key prefix
    pub federation_issuer_host: Expr,
    /// ARN of the OIDC identity provider
    pub federation_provider_arn: Expr,
    /// Graph node of the cluster
    pub cluster_node: NodeId,
    /// Graph node of the federation provider, when declared
    pub federation_node: Option<NodeId>,
}

impl ClusterContext {
    /// ARN synthesis settings for this cluster's account and region
    pub fn arn_context(&self) -> ArnContext {
        ArnContext::new(&self.partition, &self.region, self.account_id.clone())
    }

    /// Whether roles can be rebound to federated trust
    pub fn federation_ready(&self) -> bool {
        self.federation_node.is_some()
    }

    /// Issuer host derived from the cluster's issuer URL
    pub fn issuer_host_from(issuer_url: Expr) -> Expr {
        Expr::replace(issuer_url, "https://", "")
    }

    /// Provider ARN synthesized from account and issuer host
    pub fn provider_arn_for(partition: &str, account_id: &Expr, issuer_host: &Expr) -> Expr {
        Expr::concat(vec![
            Expr::lit(format!("arn:{partition}:iam::")),
            account_id.clone(),
            Expr::lit(":oidc-provider/"),
            issuer_host.clone(),
        ])
    }
}
