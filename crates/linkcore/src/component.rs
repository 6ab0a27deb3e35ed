use crate::{events::EventEmitter, NodeError, NodeId, Value, ValueType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable components implement
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique type identifier (e.g., "embeddings.openai", "tools.calculator")
    fn component_type(&self) -> &str;

    /// Execute the component with given context
    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError>;

    /// Optional: Initialize stateful resources (HTTP clients, connections, etc.)
    async fn initialize(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Cleanup resources
    async fn shutdown(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Validate configuration at flow load time
    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each component
#[derive(Clone)]
pub struct ComponentContext {
    /// Node instance ID within the flow
    pub node_id: NodeId,

    /// Resolved input values (defaults, literals and upstream outputs)
    pub inputs: HashMap<String, Value>,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled
    pub cancellation: CancellationToken,
}

impl ComponentContext {
    pub fn new(node_id: NodeId, events: EventEmitter) -> Self {
        Self {
            node_id,
            inputs: HashMap::new(),
            config: HashMap::new(),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(port.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a required text input
    pub fn require_text(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_input(name)?;
        value
            .as_str()
            .ok_or_else(|| NodeError::invalid_input(name, ValueType::Text, value.kind()))
    }

    /// Get an optional text input; empty strings count as absent
    pub fn text_input(&self, name: &str) -> Option<&str> {
        self.inputs
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Get a required vector input; numeric arrays are accepted too
    pub fn require_vector(&self, name: &str) -> Result<Vec<f32>, NodeError> {
        match self.require_input(name)? {
            Value::Vector(v) => Ok(v.clone()),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_f64().map(|n| n as f32))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| NodeError::invalid_input(name, ValueType::Vector, "array")),
            other => Err(NodeError::invalid_input(
                name,
                ValueType::Vector,
                other.kind(),
            )),
        }
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get a string config value, if set
    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(Value::as_str)
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Output from component execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    /// Execution metadata
    pub metadata: ExecutionMetadata,
}

impl ComponentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.custom.insert(key.into(), value.into());
        self
    }
}

/// Metadata about component execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub execution_time_ms: u64,
    pub attempts: u32,
    pub cached: bool,
    pub custom: HashMap<String, Value>,
}
