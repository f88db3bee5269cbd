//! Stack outputs
//!
//! Outputs are named, possibly late-bound values published once the graph
//! has been applied. They are declared alongside the graph and can be
//! evaluated offline against a state file of resolved attributes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use keel_common::{Error, Expr, NodeId, Result};

/// Value of one output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputValue {
    /// A single value
    Single(Expr),
    /// Named values, e.g. one role ARN per application
    Map(BTreeMap<String, Expr>),
}

impl OutputValue {
    fn render(&self) -> Value {
        match self {
            OutputValue::Single(expr) => Value::from(expr),
            OutputValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }

    fn evaluate(&self, resolve: &dyn Fn(&Expr) -> Option<String>) -> std::result::Result<Value, String> {
        match self {
            OutputValue::Single(expr) => resolve(expr)
                .map(Value::String)
                .ok_or_else(|| expr.to_template()),
            OutputValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, expr) in entries {
                    let value = resolve(expr).ok_or_else(|| expr.to_template())?;
                    out.insert(key.clone(), Value::String(value));
                }
                Ok(Value::Object(out))
            }
        }
    }
}

/// A named stack output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    /// Output name
    pub name: String,
    /// Value to publish
    pub value: OutputValue,
    /// Human-readable description
    pub description: String,
    /// Hidden from plain display
    pub sensitive: bool,
    /// Nodes that must complete before the value is published
    pub depends_on: Vec<NodeId>,
}

impl Output {
    /// A single-valued output
    pub fn new(name: impl Into<String>, value: Expr, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: OutputValue::Single(value),
            description: description.into(),
            sensitive: false,
            depends_on: Vec::new(),
        }
    }

    /// A map-valued output
    pub fn map(
        name: impl Into<String>,
        entries: BTreeMap<String, Expr>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            value: OutputValue::Map(entries),
            ..Self::new(name, Expr::lit(""), description)
        }
    }

    /// Mark as sensitive
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Publish only after `nodes`
    pub fn depending_on(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.depends_on.extend(nodes);
        self
    }
}

/// Serialized form of an output in the graph document
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDocument {
    /// Templated value
    pub value: Value,
    /// Description
    pub description: String,
    /// Sensitive flag
    pub sensitive: bool,
    /// Ordering constraints
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<NodeId>,
}

/// One output after evaluation against resolved state
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedOutput {
    /// Concrete value
    pub value: Value,
    /// Sensitive flag
    pub sensitive: bool,
}

/// All outputs of a stack, by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outputs {
    entries: BTreeMap<String, Output>,
}

impl Outputs {
    /// No outputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output; names are unique
    pub fn insert(&mut self, output: Output) -> Result<()> {
        if self.entries.contains_key(&output.name) {
            return Err(Error::invalid_config_for(
                &output.name,
                "output is declared twice",
            ));
        }
        self.entries.insert(output.name.clone(), output);
        Ok(())
    }

    /// Output by name
    pub fn get(&self, name: &str) -> Option<&Output> {
        self.entries.get(name)
    }

    /// Outputs in name order
    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.entries.values()
    }

    /// Number of outputs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Document form keyed by name
    pub fn document(&self) -> BTreeMap<&str, OutputDocument> {
        self.entries
            .iter()
            .map(|(name, output)| {
                (
                    name.as_str(),
                    OutputDocument {
                        value: output.value.render(),
                        description: output.description.clone(),
                        sensitive: output.sensitive,
                        depends_on: output.depends_on.clone(),
                    },
                )
            })
            .collect()
    }

    /// Evaluate every output against `state`, keyed by `node.attribute`
    ///
    /// Fails on the first output that reads an attribute missing from the
    /// state.
    pub fn evaluate(
        &self,
        state: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, ResolvedOutput>> {
        let lookup = |expr: &Expr| expr.evaluate(&|r| state.get(&r.key()).cloned());
        let mut resolved = BTreeMap::new();
        for (name, output) in &self.entries {
            let value = output
                .value
                .evaluate(&lookup)
                .map_err(|template| Error::unresolved(format!("output {name}"), template))?;
            resolved.insert(
                name.clone(),
                ResolvedOutput {
                    value,
                    sensitive: output.sensitive,
                },
            );
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> Outputs {
        let mut outputs = Outputs::new();
        outputs
            .insert(Output::new(
                "cluster_name",
                Expr::reference("eks-cluster", "name"),
                "EKS cluster name",
            ))
            .unwrap();
        outputs
            .insert(
                Output::new(
                    "cluster_ca_certificate",
                    Expr::reference("eks-cluster", "certificate_authority.0.data"),
                    "CA data",
                )
                .sensitive(),
            )
            .unwrap();
        outputs
            .insert(Output::map(
                "app_role_arns",
                BTreeMap::from([(
                    "event-exporter".to_string(),
                    Expr::reference("app-iam-monitoring-event-exporter", "arn"),
                )]),
                "Role ARN per application",
            ))
            .unwrap();
        outputs
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut outputs = outputs();
        let err = outputs
            .insert(Output::new("cluster_name", Expr::lit("x"), "again"))
            .unwrap_err();
        assert_eq!(err.subject(), Some("cluster_name"));
    }

    #[test]
    fn document_renders_templates() {
        let outputs = outputs();
        let doc = outputs.document();
        assert_eq!(doc["cluster_name"].value, "${eks-cluster.name}");
        assert!(doc["cluster_ca_certificate"].sensitive);
        assert_eq!(
            doc["app_role_arns"].value["event-exporter"],
            "${app-iam-monitoring-event-exporter.arn}"
        );
    }

    /// Story: outputs evaluate once the engine reports the attributes
    #[test]
    fn story_outputs_resolve_from_state() {
        let outputs = outputs();
        let mut state = BTreeMap::from([
            ("eks-cluster.name".to_string(), "layerx-eks".to_string()),
            ("eks-cluster.certificate_authority.0.data".to_string(), "Q0E=".to_string()),
        ]);

        let err = outputs.evaluate(&state).unwrap_err();
        assert!(matches!(err, Error::UnresolvedValue { .. }));

        state.insert(
            "app-iam-monitoring-event-exporter.arn".to_string(),
            "arn:aws:iam::123456789012:role/x".to_string(),
        );
        let resolved = outputs.evaluate(&state).unwrap();
        assert_eq!(resolved["cluster_name"].value, "layerx-eks");
        assert!(resolved["cluster_ca_certificate"].sensitive);
        assert_eq!(
            resolved["app_role_arns"].value["event-exporter"],
            "arn:aws:iam::123456789012:role/x"
        );
    }
}
