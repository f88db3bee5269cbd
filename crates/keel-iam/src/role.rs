//! Workload identity role specifications
//!
//! An [`IdentityRoleSpec`] describes a cloud role assumed by a Kubernetes
//! service account, plus the resources it may touch. Specs are plain values:
//! declaring them in the graph is the job of [`crate::trust::RoleDraft`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keel_common::naming::build_runtime_name;
use keel_common::{Error, Expr, NodeId, Result};

use crate::arn::ArnContext;
use crate::policy::{PolicyDocument, Statement};

/// Node-id suffix of a role's trust binding
pub const TRUST_BINDING_SUFFIX: &str = "trust-binding";

const SECRETS_ACTIONS: &[&str] = &["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"];
const OBJECT_STORE_ACTIONS: &[&str] = &["s3:GetObject", "s3:ListBucket"];
const QUEUE_ACTIONS: &[&str] = &[
    "sqs:ReceiveMessage",
    "sqs:DeleteMessage",
    "sqs:GetQueueAttributes",
    "sqs:GetQueueUrl",
];

/// How the service-account subject is matched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustMode {
    /// Namespace selector is a single namespace
    Exact,
    /// Namespace selector contains `*`
    Pattern,
}

impl TrustMode {
    /// Pattern iff the selector contains a wildcard
    pub fn for_selector(namespace_selector: &str) -> Self {
        if namespace_selector.contains('*') {
            TrustMode::Pattern
        } else {
            TrustMode::Exact
        }
    }
}

/// A class of resource access granted to a role
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum ResourceGrant {
    /// Secrets Manager secret name/pattern or ARN
    SecretAccess(String),
    /// S3 bucket name or ARN
    ObjectStoreAccess(String),
    /// SQS queue name or ARN
    QueueAccess(String),
    /// A complete policy document, attached verbatim
    RawPolicy(serde_json::Value),
}

/// Body of an attached inline policy
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyBody {
    /// Synthesized from grants
    Generated(PolicyDocument),
    /// Supplied verbatim by configuration
    Raw(serde_json::Value),
}

impl PolicyBody {
    /// JSON string for the policy attribute
    pub fn to_json(&self) -> Result<String> {
        match self {
            PolicyBody::Generated(doc) => doc.to_json(),
            PolicyBody::Raw(value) => serde_json::to_string(value)
                .map_err(|e| Error::serialization_for_kind("RawPolicy", e.to_string())),
        }
    }

    /// Late-bound values embedded in the body
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            PolicyBody::Generated(doc) => doc.exprs(),
            PolicyBody::Raw(_) => Vec::new(),
        }
    }
}

/// An inline policy attached to a role
#[derive(Clone, Debug, PartialEq)]
pub struct AttachedPolicy {
    /// Name suffix ("secrets-access", "custom-policy-0", ...)
    pub suffix: String,
    /// Runtime policy name
    pub name: Expr,
    /// Graph-node id
    pub node_id: NodeId,
    /// Policy document
    pub body: PolicyBody,
}

/// A role bound to a Kubernetes service account
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityRoleSpec {
    /// Application (or platform component) the role belongs to
    pub app_name: String,
    /// Runtime role name
    pub role_name: Expr,
    /// Graph-node id of the role
    pub node_id: NodeId,
    /// Human readable description
    pub description: String,
    /// Exact or pattern subject match
    pub trust_mode: TrustMode,
    /// Namespace, possibly with `*`
    pub namespace_selector: String,
    /// Service account; defaults to the app name
    pub service_account_name: Option<String>,
    /// Resource access in declaration order
    pub resource_grants: Vec<ResourceGrant>,
    /// AWS-managed policies to attach (names or ARNs)
    pub managed_policies: Vec<String>,
    /// Tags applied to the role
    pub tags: BTreeMap<String, String>,
}

impl IdentityRoleSpec {
    /// Spec with trust mode derived from the selector and no grants
    pub fn new(
        app_name: impl Into<String>,
        namespace_selector: impl Into<String>,
        role_name: Expr,
        node_id: impl Into<String>,
    ) -> Self {
        let app_name = app_name.into();
        let namespace_selector = namespace_selector.into();
        Self {
            description: format!("IAM role for {app_name} in the {namespace_selector} namespace"),
            trust_mode: TrustMode::for_selector(&namespace_selector),
            app_name,
            role_name,
            node_id: node_id.into(),
            namespace_selector,
            service_account_name: None,
            resource_grants: Vec::new(),
            managed_policies: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Use a specific service account
    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account_name = Some(name.into());
        self
    }

    /// Attach an AWS-managed policy
    pub fn with_managed_policy(mut self, policy: impl Into<String>) -> Self {
        self.managed_policies.push(policy.into());
        self
    }

    /// Service account the role trusts
    pub fn service_account(&self) -> &str {
        self.service_account_name
            .as_deref()
            .filter(|sa| !sa.is_empty())
            .unwrap_or(&self.app_name)
    }

    /// Token subject the role trusts
    pub fn subject(&self) -> String {
        service_account_subject(&self.namespace_selector, self.service_account())
    }

    /// Node id of the role's trust binding
    pub fn binding_node_id(&self) -> NodeId {
        format!("{}-{TRUST_BINDING_SUFFIX}", self.node_id)
    }

    /// Every node id declaring this role claims: the role, its inline
    /// policies and its trust binding
    pub fn claimed_node_ids(&self) -> Vec<NodeId> {
        let kinds = [
            ("secrets-access", self.has_grant(|g| matches!(g, ResourceGrant::SecretAccess(_)))),
            ("s3-access", self.has_grant(|g| matches!(g, ResourceGrant::ObjectStoreAccess(_)))),
            ("sqs-access", self.has_grant(|g| matches!(g, ResourceGrant::QueueAccess(_)))),
        ];
        let raw = self
            .resource_grants
            .iter()
            .filter(|g| matches!(g, ResourceGrant::RawPolicy(_)))
            .count();

        let mut ids = vec![self.node_id.clone()];
        ids.extend(
            kinds
                .iter()
                .filter(|(_, present)| *present)
                .map(|(suffix, _)| format!("{}-{suffix}", self.node_id)),
        );
        ids.extend((0..raw).map(|index| format!("{}-custom-policy-{index}", self.node_id)));
        ids.push(self.binding_node_id());
        ids
    }

    fn has_grant(&self, kind: impl Fn(&ResourceGrant) -> bool) -> bool {
        self.resource_grants.iter().any(kind)
    }

    /// Inline policies, one per grant kind plus one per raw document
    pub fn policies(&self, cluster_name: &str, arns: &ArnContext) -> Vec<AttachedPolicy> {
        let mut secrets = Vec::new();
        let mut buckets = Vec::new();
        let mut queues = Vec::new();
        let mut raw = Vec::new();
        for grant in &self.resource_grants {
            match grant {
                ResourceGrant::SecretAccess(pattern) => secrets.push(arns.secret(pattern)),
                ResourceGrant::ObjectStoreAccess(bucket) => buckets.extend(arns.bucket(bucket)),
                ResourceGrant::QueueAccess(queue) => queues.push(arns.queue(queue)),
                ResourceGrant::RawPolicy(doc) => raw.push(doc.clone()),
            }
        }

        let mut policies = Vec::new();
        for (suffix, actions, resources) in [
            ("secrets-access", SECRETS_ACTIONS, secrets),
            ("s3-access", OBJECT_STORE_ACTIONS, buckets),
            ("sqs-access", QUEUE_ACTIONS, queues),
        ] {
            if resources.is_empty() {
                continue;
            }
            let body = PolicyBody::Generated(PolicyDocument::new(vec![Statement::allow(
                actions, resources,
            )]));
            policies.push(self.attached(cluster_name, suffix.to_string(), body));
        }
        for (index, doc) in raw.into_iter().enumerate() {
            let suffix = format!("custom-policy-{index}");
            policies.push(self.attached(cluster_name, suffix, PolicyBody::Raw(doc)));
        }
        policies
    }

    fn attached(&self, cluster_name: &str, suffix: String, body: PolicyBody) -> AttachedPolicy {
        AttachedPolicy {
            name: build_runtime_name(&[
                Expr::lit(cluster_name),
                Expr::lit(&self.namespace_selector),
                Expr::lit(&self.app_name),
                Expr::lit(&suffix),
            ]),
            node_id: format!("{}-{}", self.node_id, suffix),
            suffix,
            body,
        }
    }
}

/// `system:serviceaccount:<namespace>:<service-account>`
pub fn service_account_subject(namespace_selector: &str, service_account: &str) -> String {
    format!("system:serviceaccount:{namespace_selector}:{service_account}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arns() -> ArnContext {
        ArnContext::new("aws", "eu-central-1", Expr::lit("123456789012"))
    }

    fn spec(namespace: &str) -> IdentityRoleSpec {
        IdentityRoleSpec::new("proc", namespace, Expr::lit("c-ns-proc-role"), "app-iam-ns-proc")
    }

    #[test]
    fn trust_mode_follows_wildcard() {
        assert_eq!(TrustMode::for_selector("monitoring"), TrustMode::Exact);
        assert_eq!(TrustMode::for_selector("data-*"), TrustMode::Pattern);
        assert_eq!(spec("data-*").trust_mode, TrustMode::Pattern);
    }

    #[test]
    fn service_account_defaults_to_app_name() {
        assert_eq!(spec("ns").subject(), "system:serviceaccount:ns:proc");
        let named = spec("ns").with_service_account("proc-sa");
        assert_eq!(named.subject(), "system:serviceaccount:ns:proc-sa");
        let empty = spec("ns").with_service_account("");
        assert_eq!(empty.service_account(), "proc");
    }

    #[test]
    fn one_policy_per_grant_kind() {
        let mut role = spec("ns");
        role.resource_grants = vec![
            ResourceGrant::SecretAccess("a".into()),
            ResourceGrant::QueueAccess("q".into()),
            ResourceGrant::SecretAccess("b*".into()),
            ResourceGrant::ObjectStoreAccess("bucket".into()),
            ResourceGrant::ObjectStoreAccess("other".into()),
        ];
        let policies = role.policies("c", &arns());
        let suffixes: Vec<_> = policies.iter().map(|p| p.suffix.as_str()).collect();
        assert_eq!(suffixes, vec!["secrets-access", "s3-access", "sqs-access"]);

        let PolicyBody::Generated(s3) = &policies[1].body else {
            panic!("expected generated policy");
        };
        assert_eq!(s3.statement[0].resource.len(), 4);
        assert_eq!(policies[0].name.as_literal(), Some("c-ns-proc-secrets-access"));
        assert_eq!(policies[0].node_id, "app-iam-ns-proc-secrets-access");
    }

    #[test]
    fn raw_policy_keeps_its_key_order() {
        let source = r#"{"Version":"2012-10-17","Statement":[{"Sid":"Read","Effect":"Allow","Action":"s3:GetObject","Resource":"*"}]}"#;
        let body = PolicyBody::Raw(serde_json::from_str(source).unwrap());
        assert_eq!(body.to_json().unwrap(), source);
    }

    #[test]
    fn raw_policies_are_indexed_in_input_order() {
        let mut role = spec("ns");
        let first = serde_json::json!({"Version": "2012-10-17", "Statement": []});
        let second = serde_json::json!({"Version": "2012-10-17", "Statement": [{"Effect": "Deny"}]});
        role.resource_grants = vec![
            ResourceGrant::RawPolicy(first.clone()),
            ResourceGrant::RawPolicy(second.clone()),
        ];
        let policies = role.policies("c", &arns());
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].suffix, "custom-policy-0");
        assert_eq!(policies[1].suffix, "custom-policy-1");
        assert_eq!(policies[1].body, PolicyBody::Raw(second.clone()));
        assert_eq!(
            policies[1].body.to_json().unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn no_grants_no_policies() {
        assert!(spec("ns").policies("c", &arns()).is_empty());
    }

    #[test]
    fn wildcard_namespace_in_policy_name_is_sanitized() {
        let mut role = spec("data-*");
        role.resource_grants = vec![ResourceGrant::QueueAccess("q".into())];
        let policies = role.policies("c", &arns());
        assert_eq!(policies[0].name.as_literal(), Some("c-data-wildcard-proc-sqs-access"));
    }
}
