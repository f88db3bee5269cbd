//! EKS cluster, managed node group and the cluster's OIDC federation provider

use serde_json::{json, Value};
use tracing::info;

use keel_common::{Expr, NodeId, ResourceGraph, ResourceNode, Result};
use keel_iam::DeclaredRole;

use crate::config::StackConfig;
use crate::network::NetworkTopology;

/// Cluster node
pub const CLUSTER_NODE: &str = "eks-cluster";
/// Node group node
pub const NODE_POOL_NODE: &str = "eks-node-group";
/// Issuer certificate lookup node
pub const THUMBPRINT_NODE: &str = "eks-oidc-thumbprint";
/// OIDC identity provider node
pub const FEDERATION_PROVIDER_NODE: &str = "eks-oidc-provider";
/// Cluster auth token lookup node
pub const CLUSTER_AUTH_NODE: &str = "eks-auth";

/// Declared cluster and node group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterResources {
    /// Cluster node
    pub cluster_node: NodeId,
    /// Node group node
    pub node_pool_node: NodeId,
    /// Cluster name as configured
    pub name: String,
}

impl ClusterResources {
    /// Runtime cluster name
    pub fn name_expr(&self) -> Expr {
        Expr::reference(&self.cluster_node, "name")
    }

    /// API server endpoint
    pub fn endpoint(&self) -> Expr {
        Expr::reference(&self.cluster_node, "endpoint")
    }

    /// Base64 CA certificate data
    pub fn certificate_authority_data(&self) -> Expr {
        Expr::reference(&self.cluster_node, "certificate_authority.0.data")
    }

    /// OIDC issuer URL
    pub fn issuer_url(&self) -> Expr {
        Expr::reference(&self.cluster_node, "identity.0.oidc.0.issuer")
    }
}

/// Declared OIDC identity provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationProvider {
    /// Provider node
    pub node_id: NodeId,
    /// Issuer certificate lookup
    pub thumbprint_node: NodeId,
}

impl FederationProvider {
    /// Runtime provider ARN
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.node_id, "arn")
    }
}

fn expr_list(exprs: &[Expr]) -> Value {
    Value::Array(exprs.iter().map(Value::from).collect())
}

/// Declare the cluster and its node group
///
/// The cluster waits for the whole network and the cluster role's policy
/// attachments; the node group waits for the cluster and the node role's.
pub fn declare_cluster(
    graph: &mut ResourceGraph,
    provider: &str,
    config: &StackConfig,
    network: &NetworkTopology,
    cluster_role: &DeclaredRole,
    node_role: &DeclaredRole,
) -> Result<ClusterResources> {
    let cluster_config = &config.cluster;
    let subnet_ids = network.subnet_ids();

    let mut cluster = ResourceNode::resource(CLUSTER_NODE, "aws_eks_cluster")
        .with_provider(provider)
        .with_attr("name", cluster_config.name.as_str())
        .with_expr("role_arn", &cluster_role.arn())
        .with_attr("version", cluster_config.version.as_str())
        .with_attr(
            "access_config",
            json!({
                "authentication_mode": cluster_config.authentication_mode,
                "bootstrap_cluster_creator_admin_permissions": true,
            }),
        )
        .with_attr("bootstrap_self_managed_addons", true)
        .with_attr("compute_config", json!({ "enabled": false }))
        .with_attr("storage_config", json!({ "block_storage": { "enabled": false } }))
        .with_attr(
            "kubernetes_network_config",
            json!({
                "service_ipv4_cidr": cluster_config.service_cidr,
                "ip_family": "ipv4",
                "elastic_load_balancing": { "enabled": false },
            }),
        )
        .with_attr(
            "vpc_config",
            json!({
                "subnet_ids": expr_list(&subnet_ids),
                "endpoint_private_access": cluster_config.endpoint_private_access,
                "endpoint_public_access": cluster_config.endpoint_public_access,
                "public_access_cidrs": cluster_config.public_access_cidrs,
            }),
        );
    for id in &subnet_ids {
        cluster = cluster.reading(id);
    }
    let cluster_node = graph.add_node(cluster)?;
    graph.add_edges(&cluster_node, &network.readiness_nodes())?;
    graph.add_edges(&cluster_node, &cluster_role.attachments)?;

    let pool = &config.node_pool;
    let mut node_pool = ResourceNode::resource(NODE_POOL_NODE, "aws_eks_node_group")
        .with_provider(provider)
        .with_expr("cluster_name", &Expr::reference(&cluster_node, "name"))
        .with_expr("node_role_arn", &node_role.arn())
        .with_expr_list("subnet_ids", &subnet_ids)
        .with_expr("version", &Expr::reference(&cluster_node, "version"))
        .with_attr("instance_types", json!([pool.instance_type]))
        .with_attr("disk_size", pool.disk_size)
        .with_attr("ami_type", pool.ami_type.as_str())
        .with_attr(
            "scaling_config",
            json!({
                "desired_size": pool.desired_size,
                "max_size": pool.max_size,
                "min_size": pool.min_size,
            }),
        );
    let mut tags = serde_json::Map::new();
    tags.insert("Name".into(), json!(format!("{}-node", cluster_config.name)));
    tags.insert(
        format!("kubernetes.io/cluster/{}", cluster_config.name),
        json!("owned"),
    );
    node_pool = node_pool.with_attr("tags", tags);
    let node_pool_node = graph.add_node(node_pool)?;
    graph.add_edges(&node_pool_node, &node_role.attachments)?;

    info!(
        cluster = %cluster_config.name,
        version = %cluster_config.version,
        nodes = pool.desired_size,
        "declared cluster and node group"
    );
    Ok(ClusterResources {
        cluster_node,
        node_pool_node,
        name: cluster_config.name.clone(),
    })
}

/// Declare the issuer certificate lookup and the OIDC identity provider
pub fn declare_federation(
    graph: &mut ResourceGraph,
    provider: &str,
    cluster: &ClusterResources,
    audience: &str,
) -> Result<FederationProvider> {
    let issuer = cluster.issuer_url();
    let thumbprint = graph.add_node(
        ResourceNode::data(THUMBPRINT_NODE, "tls_certificate").with_expr("url", &issuer),
    )?;
    let node_id = graph.add_node(
        ResourceNode::resource(FEDERATION_PROVIDER_NODE, "aws_iam_openid_connect_provider")
            .with_provider(provider)
            .with_expr("url", &issuer)
            .with_attr("client_id_list", json!([audience]))
            .with_expr_list(
                "thumbprint_list",
                &[Expr::reference(&thumbprint, "certificates.0.sha1_fingerprint")],
            ),
    )?;
    graph.add_edge(&node_id, &cluster.cluster_node)?;
    info!(provider = %node_id, "declared cluster federation provider");
    Ok(FederationProvider {
        node_id,
        thumbprint_node: thumbprint,
    })
}

/// Declare the short-lived auth token lookup for the cluster API
pub fn declare_cluster_auth(
    graph: &mut ResourceGraph,
    provider: &str,
    cluster: &ClusterResources,
) -> Result<NodeId> {
    graph.add_node(
        ResourceNode::data(CLUSTER_AUTH_NODE, "aws_eks_cluster_auth")
            .with_provider(provider)
            .with_expr("name", &cluster.name_expr()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::declare_network;
    use keel_iam::platform_roles::{cluster_role, node_role};
    use keel_iam::ArnContext;

    fn declared() -> (ResourceGraph, ClusterResources, NetworkTopology) {
        let config = StackConfig::default();
        let arns = ArnContext::new("aws", &config.region, Expr::lit("123456789012"));
        let mut graph = ResourceGraph::new();
        graph.add_node(ResourceNode::provider_config("aws", "aws")).unwrap();
        let network =
            declare_network(&mut graph, "aws", "layerx-eks", &config.region, &config.network)
                .unwrap();
        let cluster_role = cluster_role("c").declare(&mut graph, "aws", &arns).unwrap();
        let node_role = node_role("n").declare(&mut graph, "aws", &arns).unwrap();
        let cluster =
            declare_cluster(&mut graph, "aws", &config, &network, &cluster_role, &node_role)
                .unwrap();
        (graph, cluster, network)
    }

    #[test]
    fn cluster_waits_for_network_and_role() {
        let (graph, cluster, network) = declared();
        for node in network.readiness_nodes() {
            assert!(graph.depends_on(&cluster.cluster_node, &node), "cluster before {node}");
        }
        assert!(graph.has_edge(&cluster.cluster_node, "eks-cluster-role-AmazonEKSClusterPolicy"));
        assert!(graph.has_edge(&cluster.node_pool_node, &cluster.cluster_node));
        assert!(graph.has_edge(&cluster.node_pool_node, "eks-node-role-AmazonEKSWorkerNodePolicy"));
    }

    #[test]
    fn cluster_attributes_follow_config() {
        let (graph, cluster, _) = declared();
        let node = graph.node(&cluster.cluster_node).unwrap();
        assert_eq!(node.attr_str("name"), Some("layerx-eks"));
        assert_eq!(
            node.attr("kubernetes_network_config").unwrap()["service_ipv4_cidr"],
            "10.100.0.0/16"
        );
        assert_eq!(
            node.attr("vpc_config").unwrap()["subnet_ids"][1],
            "${public-subnet-2.id}"
        );
        let pool = graph.node(&cluster.node_pool_node).unwrap();
        assert_eq!(pool.attr("scaling_config").unwrap()["desired_size"], 3);
        assert_eq!(pool.attr("tags").unwrap()["Name"], "layerx-eks-node");
    }

    #[test]
    fn federation_provider_follows_cluster() {
        let (mut graph, cluster, _) = declared();
        let federation = declare_federation(&mut graph, "aws", &cluster, "sts.amazonaws.com").unwrap();
        assert!(graph.has_edge(&federation.node_id, &cluster.cluster_node));
        assert!(graph.has_edge(&federation.node_id, &federation.thumbprint_node));
        assert!(graph.has_edge(&federation.thumbprint_node, &cluster.cluster_node));
        assert_eq!(federation.arn().to_template(), "${eks-oidc-provider.arn}");
    }
}
