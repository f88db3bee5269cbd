//! GitOps engine release
//!
//! Installed last: applications it syncs expect ingress, secrets and the
//! default storage class to already exist.

use serde_json::{json, Value};
use tracing::info;

use keel_common::{NodeId, ResourceGraph, Result};

use super::ChartRelease;
use crate::config::ChartConfig;

/// Release node
pub const GITOPS_RELEASE_NODE: &str = "argocd";

fn builtin_values() -> Value {
    json!({
        "ha": { "enabled": false },
        "server": {
            "extraArgs": ["--insecure"],
            "service": { "type": "LoadBalancer" },
        },
    })
}

/// Declare the GitOps release after everything it depends on
pub fn declare_gitops(
    graph: &mut ResourceGraph,
    provider: &str,
    chart: &ChartConfig,
    waits_for: &[&str],
) -> Result<NodeId> {
    let release =
        ChartRelease::new(GITOPS_RELEASE_NODE, chart, builtin_values()).declare(graph, provider, waits_for)?;
    info!(
        release = %chart.release,
        namespace = %chart.namespace,
        "declared GitOps engine"
    );
    Ok(release)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChartsConfig;
    use keel_common::ResourceNode;

    #[test]
    fn gitops_waits_for_every_prerequisite() {
        let mut graph = ResourceGraph::new();
        graph.add_node(ResourceNode::provider_config("helm", "helm")).unwrap();
        let prerequisites = ["aws-load-balancer-controller", "external-secrets", "ebs-sc-gp3"];
        for id in prerequisites {
            graph.add_node(ResourceNode::resource(id, "helm_release")).unwrap();
        }
        let chart = ChartsConfig::default().gitops;
        let id = declare_gitops(&mut graph, "helm", &chart, &prerequisites).unwrap();

        for prerequisite in prerequisites {
            assert!(graph.has_edge(&id, prerequisite));
        }
        let node = graph.node(&id).unwrap();
        assert_eq!(node.attr("create_namespace"), Some(&Value::Bool(true)));
        assert_eq!(node.attr_str("namespace"), Some("argocd"));
        assert_eq!(node.attr("values").unwrap()["server"]["extraArgs"][0], "--insecure");
        assert!(node.failure_policy.is_none());
    }
}
