use crate::cache::{CacheConfig, ResultCache};
use crate::graph::{FlowGraph, GraphBuilder};
use crate::registry::ComponentRegistry;
use crate::{ExecutionResult, FlowExecutor};
use linkcore::{EventBus, ExecutionEvent, Flow, FlowError, FlowId, GraphError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Main runtime for executing flows
pub struct FlowRuntime {
    registry: Arc<ComponentRegistry>,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
    flows: Arc<RwLock<HashMap<FlowId, Flow>>>,
    shutdown: CancellationToken,
}

impl FlowRuntime {
    /// Create a new runtime with an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration and an empty registry
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(ComponentRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<ComponentRegistry>, config: RuntimeConfig) -> Self {
        let cache = ResultCache::new(config.cache_config());
        let executor = Arc::new(FlowExecutor::new(config.max_parallel_nodes, cache));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        tracing::info!(
            "Runtime ready: {} component types, {} parallel nodes, cache capacity {}",
            registry.len(),
            config.max_parallel_nodes,
            config.cache_capacity
        );

        Self {
            registry,
            executor,
            event_bus,
            flows: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// The component registry this runtime resolves against
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// The result cache shared by every run
    pub fn cache(&self) -> &ResultCache {
        self.executor.cache()
    }

    /// Validate a flow without running it
    pub fn validate(&self, flow: &Flow) -> Result<FlowGraph, GraphError> {
        GraphBuilder::new(&self.registry).build(flow)
    }

    /// Validate and store a flow
    pub async fn register_flow(&self, flow: Flow) -> Result<FlowId, GraphError> {
        self.validate(&flow)?;
        let id = flow.id;
        self.flows.write().await.insert(id, flow);
        Ok(id)
    }

    pub async fn get_flow(&self, flow_id: FlowId) -> Option<Flow> {
        self.flows.read().await.get(&flow_id).cloned()
    }

    pub async fn remove_flow(&self, flow_id: FlowId) -> Option<Flow> {
        self.flows.write().await.remove(&flow_id)
    }

    pub async fn list_flows(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name));
        flows
    }

    /// Execute a stored flow by ID
    pub async fn execute_flow(
        &self,
        flow_id: FlowId,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let flow = self
            .get_flow(flow_id)
            .await
            .ok_or_else(|| FlowError::NotFound(flow_id.to_string()))?;

        self.execute(&flow, inputs).await
    }

    /// Execute a flow directly (without registration)
    pub async fn execute(
        &self,
        flow: &Flow,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        self.execute_with_cancellation(flow, inputs, self.shutdown.child_token())
            .await
    }

    /// Execute a flow that stops when `cancellation` fires
    pub async fn execute_with_cancellation(
        &self,
        flow: &Flow,
        inputs: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        self.executor
            .execute(flow, &self.registry, &self.event_bus, inputs, cancellation)
            .await
    }

    /// Cancel every run started through this runtime
    pub fn shutdown(&self) {
        tracing::info!("Runtime shutting down, cancelling in-flight runs");
        self.shutdown.cancel();
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    pub cache_capacity: u64,
    pub cache_ttl_secs: Option<u64>,
}

impl RuntimeConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache_capacity,
            time_to_live: self.cache_ttl_secs.map(Duration::from_secs),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            cache_capacity: 1024,
            cache_ttl_secs: None,
        }
    }
}
