use crate::{NodeId, ValueType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Flow not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by a single component while it runs.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid output '{port}': {reason}")]
    InvalidOutput { port: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        NodeError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Transient failures worth another attempt under a retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::Provider { .. } | NodeError::ExecutionFailed(_) | NodeError::Timeout { .. }
        )
    }

    pub fn invalid_input(field: &str, expected: ValueType, actual: &str) -> Self {
        NodeError::InvalidInputType {
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown component type: {0}")]
    UnknownComponent(String),

    #[error("Component type already registered: {0}")]
    DuplicateComponent(String),
}

/// Build-time validation failure. Raised before any node executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Edge references missing node: {0}")]
    DanglingEdge(NodeId),

    #[error("Node {node} ({component}) has no {direction} port '{port}'")]
    UnknownPort {
        node: NodeId,
        component: String,
        direction: PortDirection,
        port: String,
    },

    #[error("Type mismatch on {node}.{port}: expected {expected}, got {actual}")]
    TypeMismatch {
        node: NodeId,
        port: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Input {node}.{port} has more than one producing edge")]
    MultipleProducers { node: NodeId, port: String },

    #[error("Required input {node}.{port} is not connected and has no value")]
    UnsatisfiedInput { node: NodeId, port: String },

    #[error("Cyclic dependency detected involving {} node(s)", nodes.len())]
    CyclicDependency { nodes: Vec<NodeId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Why a node produced no outputs in a run.
///
/// `Execution` is attributable to the node itself; `Propagated` to the
/// ancestor named by `origin`, whose own entry carries the real error.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeFailure {
    #[error("{error}")]
    Execution { error: NodeError },

    #[error("Skipped: upstream node {origin} failed")]
    Propagated { origin: NodeId },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeFailure {
    pub fn is_propagated(&self) -> bool {
        matches!(self, NodeFailure::Propagated { .. })
    }

    /// The node the failure started at, if it was propagated.
    pub fn origin(&self) -> Option<NodeId> {
        match self {
            NodeFailure::Propagated { origin } => Some(*origin),
            _ => None,
        }
    }
}

impl From<NodeError> for NodeFailure {
    fn from(error: NodeError) -> Self {
        match error {
            NodeError::Cancelled => NodeFailure::Cancelled,
            error => NodeFailure::Execution { error },
        }
    }
}
