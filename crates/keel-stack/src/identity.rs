//! Workload roles after the trust rebind
//!
//! Every drafted role is rebound to the cluster's federation provider once
//! that provider exists. With federation disabled the rebind cannot happen:
//! the role keeps its placeholder trust and no pod can assume it. That is a
//! silent authorization gap, not an error, so it is recorded as a
//! [`TrustGap`] and logged.

use serde::Serialize;
use tracing::{info, warn};

use keel_common::{Expr, NodeId, ResourceGraph, Result};
use keel_iam::{ClusterContext, RoleBinding, RoleDraft};

/// A drafted role as the rest of the stack consumes it
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadRole {
    /// App or component the role belongs to
    pub app_name: String,
    /// Role node
    pub role_node: NodeId,
    /// Trust binding, absent when federation is disabled
    pub binding: Option<RoleBinding>,
}

impl WorkloadRole {
    /// Runtime role ARN
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.role_node, "arn")
    }

    /// Node after which the role is usable by pods
    pub fn ready_node(&self) -> &str {
        self.binding
            .as_ref()
            .map_or(self.role_node.as_str(), |b| b.node_id.as_str())
    }

    /// Whether the role trusts its service account
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}

/// A role left on placeholder trust
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustGap {
    /// App or component the role belongs to
    pub app_name: String,
    /// Role node
    pub role_node: NodeId,
    /// Why the role was not rebound
    pub reason: String,
}

/// Rebind one draft, or report why it stays on placeholder trust
pub fn bind_draft(
    graph: &mut ResourceGraph,
    provider: &str,
    ctx: &ClusterContext,
    draft: &RoleDraft,
) -> Result<(WorkloadRole, Option<TrustGap>)> {
    let role = |binding| WorkloadRole {
        app_name: draft.spec.app_name.clone(),
        role_node: draft.node_id().to_string(),
        binding,
    };
    if !ctx.federation_ready() {
        warn!(
            app = %draft.spec.app_name,
            role = %draft.node_id(),
            "federation disabled; role keeps placeholder trust"
        );
        let gap = TrustGap {
            app_name: draft.spec.app_name.clone(),
            role_node: draft.node_id().to_string(),
            reason: "no federation provider is declared for the cluster".to_string(),
        };
        return Ok((role(None), Some(gap)));
    }
    let binding = RoleBinding::bind(draft, ctx)?;
    binding.declare(graph, provider)?;
    Ok((role(Some(binding)), None))
}

/// Rebind every draft, collecting the gaps
pub fn bind_drafts<'a>(
    graph: &mut ResourceGraph,
    provider: &str,
    ctx: &ClusterContext,
    drafts: impl IntoIterator<Item = &'a RoleDraft>,
    gaps: &mut Vec<TrustGap>,
) -> Result<Vec<WorkloadRole>> {
    let mut roles = Vec::new();
    for draft in drafts {
        let (role, gap) = bind_draft(graph, provider, ctx, draft)?;
        gaps.extend(gap);
        roles.push(role);
    }
    info!(
        roles = roles.len(),
        bound = roles.iter().filter(|r| r.is_bound()).count(),
        "rebound workload roles"
    );
    Ok(roles)
}
