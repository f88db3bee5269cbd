//! Error types for keel graph assembly
//!
//! Errors are structured with fields so a failed assembly points at the
//! offending application, role, or graph node. Every variant aborts assembly:
//! no partial graph is ever returned to the caller.

use thiserror::Error;

/// Default subject when no specific application or section is known
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete configuration (stack config or app IAM config)
    #[error("invalid config for {subject}: {message}")]
    InvalidConfig {
        /// Application, role or config section the error is about
        subject: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "apps[2].namespace")
        field: Option<String>,
    },

    /// A late-bound value was used where a concrete graph-node id is required
    #[error("unresolved value in {context}: {expression} is only known at apply time")]
    UnresolvedValue {
        /// Where the concrete value was required
        context: String,
        /// Rendered template of the offending expression
        expression: String,
    },

    /// A cluster-scoped handle was requested before promotion
    #[error("{handle} not initialized (provider state: {state}); promote the cluster API first")]
    NotInitialized {
        /// Name of the requested handle
        handle: String,
        /// Lifecycle state at the time of the request
        state: String,
    },

    /// Resource graph construction error (duplicate node, dangling edge, cycle)
    #[error("graph error at {node}: {message}")]
    Graph {
        /// Node id the error is about
        node: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Reading a configuration or state file failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an invalid-config error without a specific subject
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            subject: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-config error naming the offending application or section
    pub fn invalid_config_for(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            subject: subject.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-config error with subject and field path
    pub fn invalid_config_for_field(
        subject: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            subject: subject.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an unresolved-value error
    pub fn unresolved(context: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::UnresolvedValue {
            context: context.into(),
            expression: expression.into(),
        }
    }

    /// Create a not-initialized error for a gated provider handle
    pub fn not_initialized(handle: impl Into<String>, state: impl Into<String>) -> Self {
        Self::NotInitialized {
            handle: handle.into(),
            state: state.into(),
        }
    }

    /// Create a graph error for a node
    pub fn graph(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Graph {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an I/O error for a file path
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the subject (application, role or section) if this error has one
    pub fn subject(&self) -> Option<&str> {
        match self {
            Error::InvalidConfig { subject, .. } => Some(subject),
            Error::Graph { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Whether the error stems from user configuration rather than a code bug
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. } | Error::UnresolvedValue { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization_for_kind("json", e.to_string())
    }
}
