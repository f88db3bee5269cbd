//! Chart-deployed platform services
//!
//! Each service is one chart release executed through the chart deployment
//! provider. Built-in values are declared per service; values from the chart's
//! config section are deep-merged over them, so a config only needs the keys
//! it changes.

pub mod gitops;
pub mod ingress;
pub mod secret_sync;

use serde_json::Value;
use tracing::debug;

use keel_common::{Expr, FailurePolicy, NodeId, ResourceGraph, ResourceNode, Result};

use crate::config::ChartConfig;

/// Engine type of a chart release node
pub const CHART_RELEASE_TYPE: &str = "helm_release";

/// Timeout applied to releases that install CRDs
pub const CHART_TIMEOUT_SECONDS: u32 = 900;

/// Resource requests/limits block used by chart values
pub(crate) fn resources(request_cpu: &str, request_mem: &str, limit_cpu: &str, limit_mem: &str) -> Value {
    serde_json::json!({
        "requests": { "cpu": request_cpu, "memory": request_mem },
        "limits": { "cpu": limit_cpu, "memory": limit_mem },
    })
}

/// Merge `overlay` into `base`
///
/// Objects merge key by key; any other overlay value replaces the base value.
/// A null overlay leaves `base` untouched.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// One chart release about to be declared
#[derive(Clone, Debug)]
pub struct ChartRelease<'a> {
    node_id: &'a str,
    chart: &'a ChartConfig,
    values: Value,
    reads: Vec<Expr>,
    failure_policy: Option<FailurePolicy>,
}

impl<'a> ChartRelease<'a> {
    /// Release of `chart` with built-in `values`
    pub fn new(node_id: &'a str, chart: &'a ChartConfig, values: Value) -> Self {
        Self {
            node_id,
            chart,
            values,
            reads: Vec::new(),
            failure_policy: None,
        }
    }

    /// Record a late-bound value embedded in the built-in values
    pub fn reading(mut self, expr: &Expr) -> Self {
        self.reads.push(expr.clone());
        self
    }

    /// Failure handling for the release
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Values after merging the chart config over the built-ins
    pub fn values(&self) -> Value {
        let mut values = self.values.clone();
        merge_values(&mut values, &self.chart.values);
        values
    }

    /// Declare the release and its ordering edges
    pub fn declare(
        self,
        graph: &mut ResourceGraph,
        provider: &str,
        waits_for: &[&str],
    ) -> Result<NodeId> {
        let values = self.values();
        let mut node = ResourceNode::resource(self.node_id, CHART_RELEASE_TYPE)
            .with_provider(provider)
            .with_attr("name", self.chart.release.as_str())
            .with_attr("repository", self.chart.repository.as_str())
            .with_attr("chart", self.chart.chart.as_str())
            .with_attr("version", self.chart.version.as_str())
            .with_attr("namespace", self.chart.namespace.as_str())
            .with_attr("create_namespace", self.chart.create_namespace)
            .with_attr("values", values);
        for expr in &self.reads {
            node = node.reading(expr);
        }
        if let Some(policy) = self.failure_policy {
            node = node.with_failure_policy(policy);
        }
        let id = graph.add_node(node)?;
        graph.add_edges(&id, waits_for)?;
        debug!(
            release = %self.chart.release,
            chart = %self.chart.chart,
            version = %self.chart.version,
            namespace = %self.chart.namespace,
            "declared chart release"
        );
        Ok(id)
    }
}

/// Failure handling for releases that install CRDs and must come up whole
pub(crate) fn atomic_release() -> FailurePolicy {
    FailurePolicy {
        atomic: true,
        cleanup_on_fail: true,
        wait: true,
        timeout_seconds: Some(CHART_TIMEOUT_SECONDS),
        ..FailurePolicy::default()
    }
}
