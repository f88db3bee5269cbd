//! Trust-policy synthesis and the two-phase role protocol
//!
//! A workload role cannot trust the cluster's OIDC provider when it is
//! created: the provider only exists after the cluster. Roles are therefore
//! declared as a [`RoleDraft`] with a placeholder service trust, and later
//! rebound by a [`RoleBinding`], which is its own graph node ordered after the
//! role, the federation provider and the cluster.
//!
//! Neither step mutates the other. A draft that is never bound keeps its
//! placeholder trust; that is an authorization gap, not an assembly error,
//! and the orchestrator reports it.

use serde_json::{Map, Value};
use tracing::debug;

use keel_common::naming::node_id;
use keel_common::{Error, Expr, NodeId, ResourceGraph, ResourceNode, Result};

use crate::arn::ArnContext;
use crate::context::ClusterContext;
use crate::policy::{
    Condition, ConditionOperator, Effect, PolicyDocument, Principal, Statement,
};
use crate::role::{AttachedPolicy, IdentityRoleSpec, TrustMode};

/// Service trusted by roles that are still waiting for federation
pub const PLACEHOLDER_SERVICE: &str = "eks.amazonaws.com";

/// Action for service trust
pub const ASSUME_ROLE: &str = "sts:AssumeRole";

/// Action for federated trust
pub const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "sts:AssumeRoleWithWebIdentity";

/// Engine type of a role
pub const ROLE_TYPE: &str = "aws_iam_role";

/// Engine type of an inline role policy
pub const ROLE_POLICY_TYPE: &str = "aws_iam_role_policy";

/// Engine type of a managed-policy attachment
pub const POLICY_ATTACHMENT_TYPE: &str = "aws_iam_role_policy_attachment";

/// Engine type of the node that re-issues a role's trust document
pub const TRUST_BINDING_TYPE: &str = "aws_iam_role_trust_binding";

/// A trust document: one statement, at most one condition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustPolicyDocument {
    statement: Statement,
}

impl TrustPolicyDocument {
    /// The single statement
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Who may assume the role
    pub fn principal(&self) -> Option<&Principal> {
        self.statement.principal.as_ref()
    }

    /// Subject condition, federated trust only
    pub fn condition(&self) -> Option<&Condition> {
        self.statement.condition.as_ref()
    }

    /// Whether the federation provider is the trusted principal
    pub fn is_federated(&self) -> bool {
        matches!(self.principal(), Some(Principal::Federated(_)))
    }

    /// Full policy document
    pub fn document(&self) -> PolicyDocument {
        PolicyDocument::new(vec![self.statement.clone()])
    }

    /// Canonical JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.document())
            .map_err(|e| Error::serialization_for_kind("TrustPolicyDocument", e.to_string()))
    }

    /// Late-bound values embedded in the document
    pub fn exprs(&self) -> Vec<Expr> {
        self.document().exprs().into_iter().cloned().collect()
    }
}

/// Trust used by a draft until it is bound
pub fn build_placeholder_trust(principal_service: &str) -> TrustPolicyDocument {
    build_service_trust(principal_service)
}

/// Service trust with no condition
pub fn build_service_trust(principal_service: &str) -> TrustPolicyDocument {
    TrustPolicyDocument {
        statement: Statement {
            effect: Effect::Allow,
            principal: Some(Principal::Service(principal_service.to_string())),
            action: vec![ASSUME_ROLE.to_string()],
            resource: Vec::new(),
            condition: None,
        },
    }
}

/// Federated trust restricted to the role's service-account subject
pub fn build_federated_trust(ctx: &ClusterContext, role: &IdentityRoleSpec) -> TrustPolicyDocument {
    let operator = match role.trust_mode {
        TrustMode::Exact => ConditionOperator::ExactMatch,
        TrustMode::Pattern => ConditionOperator::PatternMatch,
    };
    TrustPolicyDocument {
        statement: Statement {
            effect: Effect::Allow,
            principal: Some(Principal::Federated(ctx.federation_provider_arn.clone())),
            action: vec![ASSUME_ROLE_WITH_WEB_IDENTITY.to_string()],
            resource: Vec::new(),
            condition: Some(Condition {
                operator,
                key: Expr::concat(vec![ctx.federation_issuer_host.clone(), Expr::lit(":sub")]),
                value: role.subject(),
            }),
        },
    }
}

/// Graph nodes declared for one role
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeclaredRole {
    /// The role node
    pub role: NodeId,
    /// Managed-policy attachment nodes
    pub attachments: Vec<NodeId>,
    /// Inline policy nodes
    pub policies: Vec<NodeId>,
}

impl DeclaredRole {
    /// Runtime ARN of the role
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.role, "arn")
    }

    /// Runtime name of the role
    pub fn name(&self) -> Expr {
        Expr::reference(&self.role, "name")
    }

    /// Role node followed by every node attached to it
    pub fn all_nodes(&self) -> Vec<NodeId> {
        std::iter::once(&self.role)
            .chain(&self.attachments)
            .chain(&self.policies)
            .cloned()
            .collect()
    }
}

/// Everything needed to declare one `aws_iam_role` node
pub(crate) struct RoleDeclaration<'a> {
    pub node: &'a str,
    pub name: &'a Expr,
    pub description: Option<&'a str>,
    pub trust: &'a TrustPolicyDocument,
    pub managed_policies: &'a [String],
    pub tags: Map<String, Value>,
}

impl RoleDeclaration<'_> {
    /// Declare the role and one attachment node per managed policy
    pub(crate) fn declare(
        self,
        graph: &mut ResourceGraph,
        provider: &str,
        arns: &ArnContext,
    ) -> Result<DeclaredRole> {
        let mut role = ResourceNode::resource(self.node, ROLE_TYPE)
            .with_provider(provider)
            .with_expr("name", self.name)
            .with_attr("assume_role_policy", self.trust.to_json()?);
        for expr in self.trust.exprs() {
            role = role.reading(&expr);
        }
        if let Some(description) = self.description {
            role = role.with_attr("description", description);
        }
        if !self.tags.is_empty() {
            role = role.with_attr("tags", Value::Object(self.tags));
        }
        let role_id = graph.add_node(role)?;

        let mut declared = DeclaredRole {
            role: role_id,
            ..Default::default()
        };
        for policy in self.managed_policies {
            let short = policy.rsplit('/').next().unwrap_or(policy);
            let attachment =
                ResourceNode::resource(node_id(&[self.node, short]), POLICY_ATTACHMENT_TYPE)
                    .with_provider(provider)
                    .with_expr("role", &declared.name())
                    .with_attr("policy_arn", arns.managed_policy(policy));
            declared.attachments.push(graph.add_node(attachment)?);
        }
        Ok(declared)
    }
}

/// Phase one: a workload role with placeholder trust
#[derive(Clone, Debug, PartialEq)]
pub struct RoleDraft {
    /// The role being declared
    pub spec: IdentityRoleSpec,
    /// Trust used until the binding runs
    pub placeholder: TrustPolicyDocument,
}

impl RoleDraft {
    /// Draft trusting `placeholder_service` until bound
    pub fn new(spec: IdentityRoleSpec, placeholder_service: &str) -> Self {
        Self {
            placeholder: build_placeholder_trust(placeholder_service),
            spec,
        }
    }

    /// Role node id
    pub fn node_id(&self) -> &str {
        &self.spec.node_id
    }

    /// Declare the role, its managed attachments and its inline policies
    pub fn declare(
        &self,
        graph: &mut ResourceGraph,
        provider: &str,
        cluster_name: &str,
        arns: &ArnContext,
    ) -> Result<DeclaredRole> {
        let tags: Map<String, Value> = self
            .spec
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut declared = RoleDeclaration {
            node: &self.spec.node_id,
            name: &self.spec.role_name,
            description: Some(&self.spec.description),
            trust: &self.placeholder,
            managed_policies: &self.spec.managed_policies,
            tags,
        }
        .declare(graph, provider, arns)?;

        for policy in self.spec.policies(cluster_name, arns) {
            declared
                .policies
                .push(declare_inline_policy(graph, provider, &declared, &policy)?);
        }
        debug!(
            role = %declared.role,
            app = %self.spec.app_name,
            policies = declared.policies.len(),
            "declared role draft with placeholder trust"
        );
        Ok(declared)
    }
}

fn declare_inline_policy(
    graph: &mut ResourceGraph,
    provider: &str,
    role: &DeclaredRole,
    policy: &AttachedPolicy,
) -> Result<NodeId> {
    let mut node = ResourceNode::resource(&policy.node_id, ROLE_POLICY_TYPE)
        .with_provider(provider)
        .with_expr("name", &policy.name)
        .with_expr("role", &Expr::reference(&role.role, "id"))
        .with_attr("policy", policy.body.to_json()?);
    for expr in policy.body.exprs() {
        node = node.reading(expr);
    }
    graph.add_node(node)
}

/// Phase two: federated trust for a drafted role
#[derive(Clone, Debug, PartialEq)]
pub struct RoleBinding {
    /// Graph node of the binding
    pub node_id: NodeId,
    /// Role being rebound
    pub role_node: NodeId,
    /// App the role belongs to
    pub app_name: String,
    /// Final trust document
    pub trust: TrustPolicyDocument,
    /// Nodes the binding must wait for: role, federation provider, cluster
    pub waits_for: Vec<NodeId>,
}

impl RoleBinding {
    /// Bind a draft to the cluster's federation provider
    ///
    /// Fails when no federation provider is declared for the cluster.
    pub fn bind(draft: &RoleDraft, ctx: &ClusterContext) -> Result<Self> {
        let federation = ctx.federation_node.clone().ok_or_else(|| {
            Error::invalid_config_for(
                &draft.spec.app_name,
                "no federation provider is declared; the role cannot leave placeholder trust",
            )
        })?;
        Ok(Self {
            node_id: draft.spec.binding_node_id(),
            role_node: draft.spec.node_id.clone(),
            app_name: draft.spec.app_name.clone(),
            trust: build_federated_trust(ctx, &draft.spec),
            waits_for: vec![
                draft.spec.node_id.clone(),
                federation,
                ctx.cluster_node.clone(),
            ],
        })
    }

    /// Runtime ARN of the bound role
    pub fn role_arn(&self) -> Expr {
        Expr::reference(&self.role_node, "arn")
    }

    /// Declare the binding node and its ordering edges
    pub fn declare(&self, graph: &mut ResourceGraph, provider: &str) -> Result<NodeId> {
        let mut node = ResourceNode::resource(&self.node_id, TRUST_BINDING_TYPE)
            .with_provider(provider)
            .with_expr("role", &Expr::reference(&self.role_node, "name"))
            .with_attr("assume_role_policy", self.trust.to_json()?);
        for expr in self.trust.exprs() {
            node = node.reading(&expr);
        }
        let id = graph.add_node(node)?;
        graph.add_edges(&id, &self.waits_for)?;
        debug!(role = %self.role_node, binding = %id, "rebound role to federated trust");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(federated: bool) -> ClusterContext {
        ClusterContext {
            region: "eu-central-1".into(),
            partition: "aws".into(),
            cluster_name: "layerx-eks".into(),
            kubernetes_version: "1.31".into(),
            account_id: Expr::lit("123456789012"),
            federation_issuer_host: Expr::lit("oidc.eks.eu-central-1.amazonaws.com/id/ABC"),
            federation_provider_arn: Expr::reference("eks-oidc-provider", "arn"),
            cluster_node: "eks-cluster".into(),
            federation_node: federated.then(|| "eks-oidc-provider".to_string()),
        }
    }

    fn draft(namespace: &str) -> RoleDraft {
        let spec = IdentityRoleSpec::new(
            "event-exporter",
            namespace,
            Expr::lit("layerx-eks-monitoring-event-exporter-role"),
            "app-iam-monitoring-event-exporter",
        );
        RoleDraft::new(spec, PLACEHOLDER_SERVICE)
    }

    fn graph_with_dependencies() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.add_node(ResourceNode::provider_config("aws", "aws")).unwrap();
        graph
            .add_node(ResourceNode::resource("eks-cluster", "aws_eks_cluster").with_provider("aws"))
            .unwrap();
        graph
            .add_node(
                ResourceNode::resource("eks-oidc-provider", "aws_iam_openid_connect_provider")
                    .with_provider("aws"),
            )
            .unwrap();
        graph
    }

    #[test]
    fn placeholder_trust_layout() {
        let trust = build_placeholder_trust(PLACEHOLDER_SERVICE);
        assert!(!trust.is_federated());
        assert!(trust.condition().is_none());
        assert_eq!(
            trust.to_json().unwrap(),
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"eks.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#
        );
    }

    #[test]
    fn exact_namespace_uses_exact_match() {
        let trust = build_federated_trust(&ctx(true), &draft("monitoring").spec);
        let condition = trust.condition().unwrap();
        assert_eq!(condition.operator, ConditionOperator::ExactMatch);
        assert_eq!(condition.value, "system:serviceaccount:monitoring:event-exporter");
        assert_eq!(
            condition.key.as_literal(),
            Some("oidc.eks.eu-central-1.amazonaws.com/id/ABC:sub")
        );
        assert!(trust.is_federated());
    }

    #[test]
    fn wildcard_namespace_uses_pattern_match() {
        for namespace in ["data-processing-*", "*", "a*b"] {
            let trust = build_federated_trust(&ctx(true), &draft(namespace).spec);
            assert_eq!(trust.condition().unwrap().operator, ConditionOperator::PatternMatch);
        }
    }

    #[test]
    fn federated_trust_json_embeds_provider_reference() {
        let trust = build_federated_trust(&ctx(true), &draft("monitoring").spec);
        let json: Value = serde_json::from_str(&trust.to_json().unwrap()).unwrap();
        let statement = &json["Statement"][0];
        assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
        assert_eq!(statement["Principal"]["Federated"], "${eks-oidc-provider.arn}");
        assert_eq!(
            statement["Condition"]["StringEquals"]["oidc.eks.eu-central-1.amazonaws.com/id/ABC:sub"],
            "system:serviceaccount:monitoring:event-exporter"
        );
        assert_eq!(trust.exprs().len(), 1);
    }

    /// Story: draft, then bind; the role keeps its placeholder and the binding
    /// waits for role, provider and cluster
    #[test]
    fn story_two_phase_binding_orders_after_federation() {
        let mut graph = graph_with_dependencies();
        let ctx = ctx(true);
        let draft = draft("monitoring");
        let declared = draft
            .declare(&mut graph, "aws", &ctx.cluster_name, &ctx.arn_context())
            .unwrap();

        let role = graph.node(&declared.role).unwrap();
        assert!(role
            .attr_str("assume_role_policy")
            .unwrap()
            .contains("eks.amazonaws.com"));

        let binding = RoleBinding::bind(&draft, &ctx).unwrap();
        let id = binding.declare(&mut graph, "aws").unwrap();
        assert_eq!(id, "app-iam-monitoring-event-exporter-trust-binding");
        for dependency in ["app-iam-monitoring-event-exporter", "eks-oidc-provider", "eks-cluster"] {
            assert!(graph.has_edge(&id, dependency), "missing edge to {dependency}");
        }
        assert!(graph
            .node(&id)
            .unwrap()
            .attr_str("assume_role_policy")
            .unwrap()
            .contains("AssumeRoleWithWebIdentity"));

        // the draft itself is untouched
        assert!(graph
            .node(&declared.role)
            .unwrap()
            .attr_str("assume_role_policy")
            .unwrap()
            .contains("sts:AssumeRole\""));
    }

    #[test]
    fn bind_without_federation_fails_naming_the_app() {
        let err = RoleBinding::bind(&draft("monitoring"), &ctx(false)).unwrap_err();
        assert_eq!(err.subject(), Some("event-exporter"));
    }

    #[test]
    fn declare_adds_inline_policies_and_managed_attachments() {
        let mut graph = graph_with_dependencies();
        let ctx = ctx(true);
        let mut draft = draft("monitoring");
        draft.spec.resource_grants =
            vec![crate::role::ResourceGrant::SecretAccess("home-assignments/layerx".into())];
        draft.spec.managed_policies = vec!["service-role/AmazonEBSCSIDriverPolicy".into()];
        draft.spec.tags.insert("Application".into(), "event-exporter".into());

        let declared = draft
            .declare(&mut graph, "aws", &ctx.cluster_name, &ctx.arn_context())
            .unwrap();
        assert_eq!(
            declared.attachments,
            vec!["app-iam-monitoring-event-exporter-AmazonEBSCSIDriverPolicy".to_string()]
        );
        assert_eq!(
            declared.policies,
            vec!["app-iam-monitoring-event-exporter-secrets-access".to_string()]
        );
        for node in declared.all_nodes().iter().skip(1) {
            assert!(graph.has_edge(node, &declared.role));
        }
        let role = graph.node(&declared.role).unwrap();
        assert_eq!(role.attr("tags").unwrap()["Application"], "event-exporter");
        assert_eq!(
            graph
                .node(&declared.attachments[0])
                .unwrap()
                .attr_str("policy_arn"),
            Some("arn:aws:iam::aws:policy/service-role/AmazonEBSCSIDriverPolicy")
        );
    }
}
