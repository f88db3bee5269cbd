//! Roles the platform itself needs
//!
//! The cluster and node roles trust an AWS service and are final when
//! declared. The block-storage driver and ingress controller roles are
//! workload roles in `kube-system` and go through the same draft/bind cycle
//! as application roles.

use serde_json::Map;
use tracing::debug;

use keel_common::{Expr, NodeId, ResourceGraph, Result, KUBE_SYSTEM_NAMESPACE};

use crate::arn::ArnContext;
use crate::role::IdentityRoleSpec;
use crate::trust::{build_service_trust, DeclaredRole, RoleDeclaration, RoleDraft};

/// Service principal of the EKS control plane
pub const EKS_SERVICE: &str = "eks.amazonaws.com";

/// Service principal of EC2 instances
pub const EC2_SERVICE: &str = "ec2.amazonaws.com";

/// Cluster role node
pub const CLUSTER_ROLE_NODE: &str = "eks-cluster-role";

/// Node role node
pub const NODE_ROLE_NODE: &str = "eks-node-role";

/// Block-storage driver role node
pub const BLOCK_STORAGE_ROLE_NODE: &str = "ebs-csi-driver-role";

/// Ingress controller role node
pub const INGRESS_ROLE_NODE: &str = "lb-controller-role";

/// Service account of the block-storage CSI controller
pub const BLOCK_STORAGE_SERVICE_ACCOUNT: &str = "ebs-csi-controller-sa";

/// Service account of the ingress controller
pub const INGRESS_SERVICE_ACCOUNT: &str = "aws-load-balancer-controller";

const CLUSTER_POLICIES: &[&str] = &["AmazonEKSClusterPolicy"];

const NODE_POLICIES: &[&str] = &[
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonSSMManagedInstanceCore",
];

const BLOCK_STORAGE_POLICIES: &[&str] = &["service-role/AmazonEBSCSIDriverPolicy"];

/// A role assumed by an AWS service, final at declaration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRole {
    /// Graph-node id
    pub node_id: NodeId,
    /// Runtime role name
    pub name: Expr,
    /// Trusted service principal
    pub service: String,
    /// AWS-managed policies to attach
    pub managed_policies: Vec<String>,
}

impl ServiceRole {
    /// Declare the role and its managed-policy attachments
    pub fn declare(
        &self,
        graph: &mut ResourceGraph,
        provider: &str,
        arns: &ArnContext,
    ) -> Result<DeclaredRole> {
        let trust = build_service_trust(&self.service);
        let declared = RoleDeclaration {
            node: &self.node_id,
            name: &self.name,
            description: None,
            trust: &trust,
            managed_policies: &self.managed_policies,
            tags: Map::new(),
        }
        .declare(graph, provider, arns)?;
        debug!(role = %declared.role, service = %self.service, "declared service role");
        Ok(declared)
    }
}

fn owned(policies: &[&str]) -> Vec<String> {
    policies.iter().map(|p| p.to_string()).collect()
}

/// Role assumed by the EKS control plane
pub fn cluster_role(name: &str) -> ServiceRole {
    ServiceRole {
        node_id: CLUSTER_ROLE_NODE.to_string(),
        name: Expr::lit(name),
        service: EKS_SERVICE.to_string(),
        managed_policies: owned(CLUSTER_POLICIES),
    }
}

/// Role assumed by worker nodes
pub fn node_role(name: &str) -> ServiceRole {
    ServiceRole {
        node_id: NODE_ROLE_NODE.to_string(),
        name: Expr::lit(name),
        service: EC2_SERVICE.to_string(),
        managed_policies: owned(NODE_POLICIES),
    }
}

/// Draft for the block-storage CSI controller
pub fn block_storage_driver_role(name: &str, placeholder_service: &str) -> RoleDraft {
    let mut spec = IdentityRoleSpec::new(
        "ebs-csi-driver",
        KUBE_SYSTEM_NAMESPACE,
        Expr::lit(name),
        BLOCK_STORAGE_ROLE_NODE,
    )
    .with_service_account(BLOCK_STORAGE_SERVICE_ACCOUNT);
    spec.description = "IAM role for the EBS CSI driver controller".to_string();
    spec.managed_policies = owned(BLOCK_STORAGE_POLICIES);
    RoleDraft::new(spec, placeholder_service)
}

/// Draft for the ingress (load balancer) controller
pub fn ingress_controller_role(
    name: &str,
    managed_policies: &[String],
    placeholder_service: &str,
) -> RoleDraft {
    let mut spec = IdentityRoleSpec::new(
        INGRESS_SERVICE_ACCOUNT,
        KUBE_SYSTEM_NAMESPACE,
        Expr::lit(name),
        INGRESS_ROLE_NODE,
    )
    .with_service_account(INGRESS_SERVICE_ACCOUNT);
    spec.description = "IAM role for the AWS load balancer controller".to_string();
    spec.managed_policies = managed_policies.to_vec();
    RoleDraft::new(spec, placeholder_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{PLACEHOLDER_SERVICE, POLICY_ATTACHMENT_TYPE};
    use keel_common::ResourceNode;

    fn arns() -> ArnContext {
        ArnContext::new("aws", "eu-central-1", Expr::lit("123456789012"))
    }

    fn graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.add_node(ResourceNode::provider_config("aws", "aws")).unwrap();
        graph
    }

    #[test]
    fn node_role_attaches_worker_policies() {
        let mut graph = graph();
        let declared = node_role("layerx-eks-node-role")
            .declare(&mut graph, "aws", &arns())
            .unwrap();
        assert_eq!(declared.attachments.len(), 4);
        let arns: Vec<_> = graph
            .nodes_of_type(POLICY_ATTACHMENT_TYPE)
            .filter_map(|n| n.attr_str("policy_arn"))
            .collect();
        assert!(arns.contains(&"arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy"));
        assert!(arns.contains(&"arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore"));
        let role = graph.node(NODE_ROLE_NODE).unwrap();
        assert!(role
            .attr_str("assume_role_policy")
            .unwrap()
            .contains("ec2.amazonaws.com"));
    }

    #[test]
    fn cluster_role_trusts_eks() {
        let mut graph = graph();
        let declared = cluster_role("layerx-eks-cluster-role")
            .declare(&mut graph, "aws", &arns())
            .unwrap();
        assert_eq!(declared.attachments, vec!["eks-cluster-role-AmazonEKSClusterPolicy"]);
        assert_eq!(
            graph.node(CLUSTER_ROLE_NODE).unwrap().attr_str("name"),
            Some("layerx-eks-cluster-role")
        );
    }

    #[test]
    fn workload_platform_roles_live_in_kube_system() {
        let csi = block_storage_driver_role("csi", PLACEHOLDER_SERVICE);
        assert_eq!(csi.spec.subject(), "system:serviceaccount:kube-system:ebs-csi-controller-sa");
        assert_eq!(csi.spec.managed_policies, vec!["service-role/AmazonEBSCSIDriverPolicy"]);

        let ingress = ingress_controller_role(
            "lb",
            &["ElasticLoadBalancingFullAccess".to_string()],
            PLACEHOLDER_SERVICE,
        );
        assert_eq!(
            ingress.spec.subject(),
            "system:serviceaccount:kube-system:aws-load-balancer-controller"
        );
        assert_eq!(ingress.node_id(), INGRESS_ROLE_NODE);
    }
}
