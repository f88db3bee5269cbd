//! Native EKS add-ons

use tracing::info;

use keel_common::{NodeId, ResourceGraph, ResourceNode, Result};

use crate::cluster::ClusterResources;
use crate::config::AddonConfig;
use crate::identity::WorkloadRole;

/// Block-storage CSI add-on node
pub const BLOCK_STORAGE_ADDON_NODE: &str = "ebs-csi-addon";
/// Add-on name EKS knows the CSI driver by
pub const BLOCK_STORAGE_ADDON_NAME: &str = "aws-ebs-csi-driver";

/// Declare the block-storage CSI driver add-on
///
/// The add-on runs on the node group under the driver's role, so it waits
/// for both as well as the cluster.
pub fn declare_block_storage_addon(
    graph: &mut ResourceGraph,
    provider: &str,
    cluster: &ClusterResources,
    role: &WorkloadRole,
    config: &AddonConfig,
) -> Result<NodeId> {
    let addon = graph.add_node(
        ResourceNode::resource(BLOCK_STORAGE_ADDON_NODE, "aws_eks_addon")
            .with_provider(provider)
            .with_expr("cluster_name", &cluster.name_expr())
            .with_attr("addon_name", BLOCK_STORAGE_ADDON_NAME)
            .with_attr("addon_version", config.version.as_str())
            .with_attr(
                "resolve_conflicts_on_create",
                config.resolve_conflicts_on_create.as_str(),
            )
            .with_attr(
                "resolve_conflicts_on_update",
                config.resolve_conflicts_on_update.as_str(),
            )
            .with_expr("service_account_role_arn", &role.arn()),
    )?;
    graph.add_edges(&addon, &[cluster.node_pool_node.as_str(), role.ready_node()])?;
    info!(addon = BLOCK_STORAGE_ADDON_NAME, version = %config.version, "declared native add-on");
    Ok(addon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AddonsConfig;
    use keel_common::Expr;
    use keel_iam::platform_roles::block_storage_driver_role;
    use keel_iam::trust::PLACEHOLDER_SERVICE;
    use keel_iam::{ClusterContext, RoleBinding};

    #[test]
    fn addon_waits_for_node_pool_and_binding() {
        let mut graph = ResourceGraph::new();
        graph.add_node(ResourceNode::provider_config("aws", "aws")).unwrap();
        for (id, ty) in [
            ("eks-cluster", "aws_eks_cluster"),
            ("eks-node-group", "aws_eks_node_group"),
            ("eks-oidc-provider", "aws_iam_openid_connect_provider"),
        ] {
            graph
                .add_node(ResourceNode::resource(id, ty).with_provider("aws"))
                .unwrap();
        }
        let arns = keel_iam::ArnContext::new("aws", "eu-central-1", Expr::lit("123456789012"));
        let draft = block_storage_driver_role("csi-role", PLACEHOLDER_SERVICE);
        draft.declare(&mut graph, "aws", "layerx-eks", &arns).unwrap();
        let ctx = ClusterContext {
            region: "eu-central-1".into(),
            partition: "aws".into(),
            cluster_name: "layerx-eks".into(),
            kubernetes_version: "1.31".into(),
            account_id: Expr::lit("123456789012"),
            federation_issuer_host: Expr::lit("oidc.example/id/X"),
            federation_provider_arn: Expr::reference("eks-oidc-provider", "arn"),
            cluster_node: "eks-cluster".into(),
            federation_node: Some("eks-oidc-provider".into()),
        };
        let binding = RoleBinding::bind(&draft, &ctx).unwrap();
        binding.declare(&mut graph, "aws").unwrap();
        let role = WorkloadRole {
            app_name: "ebs-csi-driver".into(),
            role_node: draft.node_id().to_string(),
            binding: Some(binding),
        };

        let cluster = ClusterResources {
            cluster_node: "eks-cluster".into(),
            node_pool_node: "eks-node-group".into(),
            name: "layerx-eks".into(),
        };
        let config = AddonsConfig::default().block_storage;
        let addon =
            declare_block_storage_addon(&mut graph, "aws", &cluster, &role, &config).unwrap();

        assert!(graph.has_edge(&addon, "eks-cluster"));
        assert!(graph.has_edge(&addon, "eks-node-group"));
        assert!(graph.has_edge(&addon, "ebs-csi-driver-role-trust-binding"));
        let node = graph.node(&addon).unwrap();
        assert_eq!(node.attr_str("addon_version"), Some("v1.44.0-eksbuild.1"));
        assert_eq!(
            node.attr_str("service_account_role_arn"),
            Some("${ebs-csi-driver-role.arn}")
        );
    }
}
