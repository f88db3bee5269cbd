//! Resource graph for keel
//!
//! Declared infrastructure is a directed graph: nodes are resources, data
//! sources and provider configurations; an edge `(from, to)` means `from` must
//! not begin until `to` has completed. Edges order execution only, they never
//! carry data (data flows through [`Expr`] references).
//!
//! Edges are recorded two ways:
//! - explicitly, with [`ResourceGraph::add_edge`];
//! - from references, when a node's attributes read another node's attributes
//!   or name it as provider.
//!
//! Both kinds end up in the same edge set so ordering can be inspected and
//! tested without an execution engine. Nodes must be added after everything
//! they reference, which keeps assembly order honest.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::expr::Expr;
use crate::{Error, Result};

/// Graph-node id
pub type NodeId = String;

/// What a node declares
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Managed resource (created/updated/destroyed)
    Resource,
    /// Read-only lookup
    Data,
    /// Provider configuration that other nodes are executed through
    Provider,
}

/// Per-node failure handling, passed through to the execution engine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicy {
    /// Roll back the whole node on failure
    pub atomic: bool,
    /// Delete partially created objects on failure
    pub cleanup_on_fail: bool,
    /// Wait for created objects to become ready
    pub wait: bool,
    /// Operation timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Replace an existing installation with the same name
    pub replace: bool,
    /// Recreate pods on upgrade
    pub recreate_pods: bool,
}

/// A declared unit of infrastructure
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    /// Graph-node id
    pub id: NodeId,
    /// Resource, data source or provider
    pub kind: NodeKind,
    /// Engine type name (e.g. "aws_iam_role")
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider node this node is executed through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<NodeId>,
    /// Attributes; late-bound values are embedded as templates
    pub attributes: Map<String, Value>,
    /// Failure handling for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    /// Nodes whose attributes this node reads
    #[serde(skip)]
    reads: BTreeSet<NodeId>,
}

impl ResourceNode {
    fn new(kind: NodeKind, id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            resource_type: resource_type.into(),
            provider: None,
            attributes: Map::new(),
            failure_policy: None,
            reads: BTreeSet::new(),
        }
    }

    /// Declare a managed resource
    pub fn resource(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(NodeKind::Resource, id, resource_type)
    }

    /// Declare a data source
    pub fn data(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(NodeKind::Data, id, resource_type)
    }

    /// Declare a provider configuration
    pub fn provider_config(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(NodeKind::Provider, id, resource_type)
    }

    /// Execute this node through the given provider node
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set a plain attribute
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Set an attribute from a possibly late-bound value
    pub fn with_expr(self, key: &str, expr: &Expr) -> Self {
        self.reading(expr).with_attr(key, expr)
    }

    /// Set a list attribute from possibly late-bound values
    pub fn with_expr_list(mut self, key: &str, exprs: &[Expr]) -> Self {
        for expr in exprs {
            self = self.reading(expr);
        }
        let values: Vec<Value> = exprs.iter().map(Value::from).collect();
        self.with_attr(key, values)
    }

    /// Record that nested attribute documents embed `expr`
    pub fn reading(mut self, expr: &Expr) -> Self {
        self.reads
            .extend(expr.references().into_iter().map(|r| r.node.clone()));
        self
    }

    /// Attach a failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Attribute by key
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute by key
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Nodes this node reads from, including its provider
    pub fn referenced_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.reads.iter().chain(self.provider.iter())
    }
}

/// Ordering constraint: `from` waits for `to`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Dependent node
    pub from: NodeId,
    /// Dependency
    pub to: NodeId,
}

/// Serializable view of a graph: nodes in execution order plus edges
#[derive(Clone, Debug, Serialize)]
pub struct GraphDocument<'a> {
    /// Nodes in topological order
    pub nodes: Vec<&'a ResourceNode>,
    /// All dependency edges
    pub edges: Vec<DependencyEdge>,
}

/// Directed dependency graph of declared infrastructure
#[derive(Clone, Debug, Default)]
pub struct ResourceGraph {
    /// Nodes by id
    nodes: BTreeMap<NodeId, ResourceNode>,
    /// Declaration order (used to break ties deterministically)
    order: Vec<NodeId>,
    /// from -> {to}
    edges_out: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// to -> {from}
    edges_in: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ResourceGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, recording edges to every node it references
    ///
    /// Fails if the id is taken or a referenced node is not declared yet.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<NodeId> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::graph(&node.id, "duplicate node id"));
        }
        let referenced: BTreeSet<NodeId> = node.referenced_nodes().cloned().collect();
        if let Some(missing) = referenced.iter().find(|r| !self.nodes.contains_key(*r)) {
            return Err(Error::graph(
                &node.id,
                format!("references undeclared node '{missing}'"),
            ));
        }

        let id = node.id.clone();
        trace!(node = %id, kind = ?node.kind, resource_type = %node.resource_type, "declared node");
        self.nodes.insert(id.clone(), node);
        self.order.push(id.clone());
        for target in referenced {
            self.insert_edge(&id, &target);
        }
        Ok(id)
    }

    /// Add an explicit ordering edge: `from` waits for `to`
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        for endpoint in [from, to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(Error::graph(
                    endpoint,
                    format!("edge {from} -> {to} uses an undeclared node"),
                ));
            }
        }
        if from == to {
            return Err(Error::graph(from, "node cannot depend on itself"));
        }
        if self.depends_on(to, from) {
            return Err(Error::graph(
                from,
                format!("edge {from} -> {to} would create a cycle"),
            ));
        }
        self.insert_edge(from, to);
        Ok(())
    }

    /// Add explicit edges from one node to several dependencies
    pub fn add_edges<S: AsRef<str>>(&mut self, from: &str, to: &[S]) -> Result<()> {
        for target in to {
            self.add_edge(from, target.as_ref())?;
        }
        Ok(())
    }

    fn insert_edge(&mut self, from: &str, to: &str) {
        self.edges_out
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.edges_in
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    /// Node by id
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Whether a node is declared
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no node is declared
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Nodes of a given engine type, in declaration order
    pub fn nodes_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a ResourceNode> + 'a {
        self.nodes().filter(move |n| n.resource_type == resource_type)
    }

    /// All edges, sorted
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.edges_out
            .iter()
            .flat_map(|(from, tos)| {
                tos.iter().map(move |to| DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect()
    }

    /// Whether the direct edge `from -> to` exists
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges_out.get(from).is_some_and(|t| t.contains(to))
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.edges_out
            .get(id)
            .map(|t| t.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a node
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.edges_in
            .get(id)
            .map(|f| f.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `from` transitively waits for `to`
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            let Some(targets) = self.edges_out.get(current) else {
                continue;
            };
            for target in targets {
                if target == to {
                    return true;
                }
                if seen.insert(target.as_str()) {
                    queue.push_back(target);
                }
            }
        }
        false
    }

    /// Execution order honoring every edge
    ///
    /// Ties are broken by declaration order so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let position: BTreeMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut pending: BTreeMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.edges_out.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<(usize, &str)> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (position[id], *id))
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(entry) = ready.pop_first() {
            let (_, id) = entry;
            sorted.push(id);
            for dependent in self.dependents(id) {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((position[dependent], dependent));
                    }
                }
            }
        }

        if sorted.len() != self.order.len() {
            let stuck = self
                .order
                .iter()
                .find(|id| !sorted.contains(&id.as_str()))
                .map(String::as_str)
                .unwrap_or("unknown");
            return Err(Error::graph(stuck, "dependency cycle detected"));
        }
        Ok(sorted)
    }

    /// Serializable view with nodes in execution order
    pub fn document(&self) -> Result<GraphDocument<'_>> {
        let nodes = self
            .topological_order()?
            .into_iter()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        Ok(GraphDocument {
            nodes,
            edges: self.edges(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(ResourceNode::provider_config("aws", "aws"))
            .unwrap();
        graph
            .add_node(ResourceNode::resource("vpc", "aws_vpc").with_provider("aws"))
            .unwrap();
        graph
            .add_node(
                ResourceNode::resource("subnet-1", "aws_subnet")
                    .with_provider("aws")
                    .with_expr("vpc_id", &Expr::reference("vpc", "id")),
            )
            .unwrap();
        graph
    }

    #[test]
    fn references_become_edges() {
        let graph = small_graph();
        assert!(graph.has_edge("vpc", "aws"));
        assert!(graph.has_edge("subnet-1", "vpc"));
        assert!(graph.has_edge("subnet-1", "aws"));
        assert_eq!(graph.dependents("vpc"), vec!["subnet-1"]);
    }

    #[test]
    fn expr_attributes_render_as_templates() {
        let graph = small_graph();
        let subnet = graph.node("subnet-1").unwrap();
        assert_eq!(subnet.attr_str("vpc_id"), Some("${vpc.id}"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut graph = small_graph();
        let err = graph
            .add_node(ResourceNode::resource("vpc", "aws_vpc"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn referencing_an_undeclared_node_fails() {
        let mut graph = ResourceGraph::new();
        let err = graph
            .add_node(
                ResourceNode::resource("subnet", "aws_subnet")
                    .with_expr("vpc_id", &Expr::reference("vpc", "id")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("undeclared node 'vpc'"));
    }

    #[test]
    fn explicit_edges_require_declared_endpoints() {
        let mut graph = small_graph();
        assert!(graph.add_edge("subnet-1", "missing").is_err());
        assert!(graph.add_edge("subnet-1", "subnet-1").is_err());
    }

    #[test]
    fn cycles_are_rejected_at_edge_time() {
        let mut graph = small_graph();
        let err = graph.add_edge("vpc", "subnet-1").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn transitive_dependencies() {
        let graph = small_graph();
        assert!(graph.depends_on("subnet-1", "aws"));
        assert!(!graph.depends_on("aws", "subnet-1"));
    }

    #[test]
    fn topological_order_respects_edges_and_declaration_order() {
        let mut graph = small_graph();
        graph
            .add_node(ResourceNode::resource("igw", "aws_internet_gateway"))
            .unwrap();
        graph.add_edge("igw", "vpc").unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["aws", "vpc", "subnet-1", "igw"]);
    }

    #[test]
    fn document_lists_nodes_in_execution_order() {
        let graph = small_graph();
        let doc = graph.document().unwrap();
        let ids: Vec<_> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["aws", "vpc", "subnet-1"]);
        assert_eq!(doc.edges.len(), 3);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["nodes"][1]["type"], "aws_vpc");
        assert_eq!(json["edges"][0]["from"], "subnet-1");
    }

    #[test]
    fn failure_policy_serializes_camel_case() {
        let policy = FailurePolicy {
            atomic: true,
            cleanup_on_fail: true,
            timeout_seconds: Some(900),
            ..Default::default()
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["cleanupOnFail"], true);
        assert_eq!(json["timeoutSeconds"], 900);
    }
}
