//! Common types for keel: errors, late-bound values, naming, and the resource graph

#![deny(missing_docs)]

pub mod error;
pub mod expr;
pub mod graph;
pub mod naming;

pub use error::Error;
pub use expr::{AttrRef, Expr};
pub use graph::{DependencyEdge, FailurePolicy, NodeId, NodeKind, ResourceGraph, ResourceNode};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// IAM policy language version used by every generated document
pub const POLICY_VERSION: &str = "2012-10-17";

/// Default AWS partition
pub const DEFAULT_PARTITION: &str = "aws";

/// Namespace for cluster-level system components
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Audience the cluster's OIDC issuer mints tokens for
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
