//! Ingress (load balancer) controller release

use serde_json::{json, Value};
use tracing::info;

use keel_common::{Expr, FailurePolicy, NodeId, ResourceGraph, Result};
use keel_iam::platform_roles::INGRESS_SERVICE_ACCOUNT;

use super::{atomic_release, resources, ChartRelease};
use crate::config::ChartConfig;
use crate::identity::WorkloadRole;

/// Release node
pub const INGRESS_RELEASE_NODE: &str = "aws-load-balancer-controller";

/// Service-account annotation carrying the role ARN
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Inputs the controller needs about the cluster it runs in
#[derive(Clone, Debug)]
pub struct IngressInputs<'a> {
    /// Runtime cluster name
    pub cluster_name: Expr,
    /// Cluster region
    pub region: &'a str,
    /// Runtime VPC id
    pub vpc_id: Expr,
    /// The controller's role
    pub role: &'a WorkloadRole,
}

fn builtin_values(inputs: &IngressInputs<'_>, role_arn: &Expr) -> Value {
    json!({
        "clusterName": Value::from(&inputs.cluster_name),
        "region": inputs.region,
        "vpcId": Value::from(&inputs.vpc_id),
        "installCRDs": true,
        "ingressClass": "alb",
        "serviceAccount": {
            "create": true,
            "name": INGRESS_SERVICE_ACCOUNT,
            "annotations": { ROLE_ARN_ANNOTATION: Value::from(role_arn) },
        },
        "enableShield": false,
        "enableWaf": false,
        "enableWafv2": false,
        "resources": resources("50m", "64Mi", "200m", "256Mi"),
        "podDisruptionBudget": { "enabled": true, "maxUnavailable": 1 },
        "webhookNamespaceSelectors": [],
    })
}

/// Declare the controller release; it waits for its role to be usable
pub fn declare_ingress_controller(
    graph: &mut ResourceGraph,
    provider: &str,
    chart: &ChartConfig,
    inputs: &IngressInputs<'_>,
) -> Result<NodeId> {
    let role_arn = inputs.role.arn();
    let release = ChartRelease::new(INGRESS_RELEASE_NODE, chart, builtin_values(inputs, &role_arn))
        .reading(&inputs.cluster_name)
        .reading(&inputs.vpc_id)
        .reading(&role_arn)
        .with_failure_policy(FailurePolicy {
            replace: true,
            recreate_pods: true,
            ..atomic_release()
        })
        .declare(graph, provider, &[inputs.role.ready_node()])?;
    info!(release = %chart.release, version = %chart.version, "declared ingress controller");
    Ok(release)
}
