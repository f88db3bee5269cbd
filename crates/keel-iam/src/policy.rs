//! IAM policy documents
//!
//! Typed statements serialized to the canonical JSON layout
//! `{"Version", "Statement": [{"Effect", "Principal", "Action", "Resource", "Condition"}]}`.
//! Field order is fixed by the struct layout, so the same document always
//! serializes to the same string. Late-bound values (account ids, provider
//! ARNs, issuer hosts) are embedded as `${...}` templates.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use keel_common::{Error, Expr, Result, POLICY_VERSION};

/// Statement effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Effect {
    /// Grant
    Allow,
    /// Explicit deny
    Deny,
}

/// Who a trust statement applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// An AWS service (e.g. "eks.amazonaws.com")
    Service(String),
    /// A federated identity provider, by ARN
    Federated(Expr),
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Principal::Service(service) => map.serialize_entry("Service", service)?,
            Principal::Federated(arn) => map.serialize_entry("Federated", &arn.to_template())?,
        }
        map.end()
    }
}

/// Condition operator for trust statements
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOperator {
    /// Exact string comparison (`StringEquals`)
    ExactMatch,
    /// Glob comparison (`StringLike`), used when the subject has a wildcard
    PatternMatch,
}

impl ConditionOperator {
    /// IAM operator name
    pub fn as_iam(&self) -> &'static str {
        match self {
            ConditionOperator::ExactMatch => "StringEquals",
            ConditionOperator::PatternMatch => "StringLike",
        }
    }
}

/// A single condition clause: `{ operator: { key: value } }`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    /// Comparison operator
    pub operator: ConditionOperator,
    /// Condition key (e.g. "<issuer-host>:sub"), may be late-bound
    pub key: Expr,
    /// Expected value
    pub value: String,
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let clause = BTreeMap::from([(self.key.to_template(), self.value.as_str())]);
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.operator.as_iam(), &clause)?;
        map.end()
    }
}

/// One policy statement
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Allow or deny
    pub effect: Effect,
    /// Trust statements only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    /// Actions; a single action serializes as a bare string
    #[serde(serialize_with = "one_or_many")]
    pub action: Vec<String>,
    /// Resource ARNs (permission statements only)
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "templates")]
    pub resource: Vec<Expr>,
    /// Trust statements only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Statement {
    /// Allow `actions` on `resources`
    pub fn allow(actions: &[&str], resources: Vec<Expr>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: resources,
            condition: None,
        }
    }
}

fn one_or_many<S: Serializer>(
    actions: &[String],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match actions {
        [single] => serializer.serialize_str(single),
        many => many.serialize(serializer),
    }
}

fn templates<S: Serializer>(
    resources: &[Expr],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(resources.len()))?;
    for resource in resources {
        seq.serialize_element(&resource.to_template())?;
    }
    seq.end()
}

/// A complete policy document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: String,
    /// Statements in order
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Document with the given statements
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Canonical JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::serialization_for_kind("PolicyDocument", e.to_string()))
    }

    /// Every late-bound value embedded in the document
    pub fn exprs(&self) -> Vec<&Expr> {
        let mut exprs = Vec::new();
        for statement in &self.statement {
            if let Some(Principal::Federated(arn)) = &statement.principal {
                exprs.push(arn);
            }
            exprs.extend(statement.resource.iter());
            if let Some(condition) = &statement.condition {
                exprs.push(&condition.key);
            }
        }
        exprs.retain(|e| !e.is_resolved());
        exprs
    }
}
