use crate::cache::{Fingerprint, ResultCache};
use crate::graph::{FlowGraph, GraphBuilder};
use crate::registry::ComponentRegistry;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use linkcore::{
    Component, ComponentContext, ComponentOutput, ErrorHandling, EventBus, ExecutionEvent,
    ExecutionId, Flow, FlowError, FlowId, NodeError, NodeFailure, NodeId, RetryPolicy, Value,
    ValueType,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Executes flows as DAGs on a bounded pool of node tasks
pub struct FlowExecutor {
    max_parallel: usize,
    cache: ResultCache,
}

impl FlowExecutor {
    pub fn new(max_parallel: usize, cache: ResultCache) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            cache,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Validate, instantiate and run a flow.
    ///
    /// Shape errors and component construction errors abort before any node
    /// runs. Node failures do not: they end up in [`ExecutionResult::errors`]
    /// together with the dependents they prevented from running.
    #[tracing::instrument(skip_all, fields(flow = %flow.id))]
    pub async fn execute(
        &self,
        flow: &Flow,
        registry: &ComponentRegistry,
        event_bus: &EventBus,
        run_inputs: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        let flow = apply_run_inputs(flow, registry, run_inputs);
        let graph = GraphBuilder::new(registry).build(&flow)?;

        event_bus.emit(ExecutionEvent::FlowStarted {
            execution_id,
            flow_id: flow.id,
            timestamp: Utc::now(),
        });

        tracing::info!(
            "Starting flow '{}' ({} nodes), execution {}",
            flow.name,
            flow.nodes.len(),
            execution_id
        );

        let mut instances = HashMap::new();
        for node_spec in &flow.nodes {
            let mut component = registry
                .create(&node_spec.component, &node_spec.config)
                .map_err(|e| {
                    FlowError::Execution(format!("Failed to create node {}: {}", node_spec.id, e))
                })?;

            if let Err(e) = component.initialize().await {
                tracing::error!("Failed to initialize node {}: {}", node_spec.id, e);
                shutdown_all(instances).await;
                return Err(FlowError::Execution(format!(
                    "Node {} initialization failed: {}",
                    node_spec.id, e
                )));
            }

            instances.insert(node_spec.id, component);
        }

        let run = RunState::new(&flow, &graph, execution_id);
        let result = self
            .execute_dag(&flow, &graph, registry, run, instances, event_bus, cancellation)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let (mut result, instances) = result?;
        result.duration_ms = duration_ms;

        shutdown_all(instances).await;

        event_bus.emit(ExecutionEvent::FlowCompleted {
            execution_id,
            success: result.is_success(),
            failed_nodes: result.errors.len(),
            duration_ms,
            timestamp: Utc::now(),
        });

        tracing::info!(
            "Flow '{}' finished in {}ms: {}/{} nodes completed",
            flow.name,
            duration_ms,
            result.completed_nodes(),
            result.total_nodes
        );

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_dag(
        &self,
        flow: &Flow,
        graph: &FlowGraph,
        registry: &ComponentRegistry,
        mut run: RunState,
        mut instances: HashMap<NodeId, Box<dyn Component>>,
        event_bus: &EventBus,
        cancellation: CancellationToken,
    ) -> Result<(ExecutionResult, HashMap<NodeId, Box<dyn Component>>), FlowError> {
        // Child token, so StopFlow can cancel this run without touching the caller's token
        let run_token = cancellation.child_token();
        let max_parallel = flow
            .settings
            .max_parallel_nodes
            .unwrap_or(self.max_parallel)
            .max(1);
        let node_timeout = flow.settings.node_timeout_ms.map(Duration::from_millis);
        let wired: HashSet<(NodeId, String)> = flow
            .edges
            .iter()
            .map(|e| (e.from_node, e.from_port.clone()))
            .collect();

        let mut running = FuturesUnordered::new();

        loop {
            while running.len() < max_parallel && !run_token.is_cancelled() {
                let Some(node_id) = run.ready.pop_front() else {
                    break;
                };

                let node_spec = flow
                    .find_node(node_id)
                    .ok_or_else(|| FlowError::Execution(format!("Node not found: {}", node_id)))?;
                let component = instances
                    .remove(&node_id)
                    .ok_or_else(|| FlowError::Execution(format!("Node not found: {}", node_id)))?;
                let factory = registry.resolve(&node_spec.component)?;
                let descriptor = factory.descriptor();

                let inputs = collect_node_inputs(node_id, flow, graph, registry, &run.outputs);

                let fingerprint = (flow.settings.cache_enabled && descriptor.cacheable).then(|| {
                    Fingerprint::compute(&node_spec.component, &node_spec.config, &inputs)
                });

                let checks = descriptor
                    .outputs
                    .iter()
                    .map(|port| OutputCheck {
                        port: port.name.clone(),
                        value_type: port.value_type,
                        wired: wired.contains(&(node_id, port.name.clone())),
                    })
                    .collect();

                let ctx = ComponentContext {
                    node_id,
                    inputs,
                    config: node_spec.config.clone(),
                    events: event_bus.create_emitter(run.execution_id, node_id),
                    cancellation: run_token.child_token(),
                };

                event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id: run.execution_id,
                    node_id,
                    component: node_spec.component.clone(),
                    timestamp: Utc::now(),
                });
                tracing::debug!("Scheduling node {} ({})", node_id, node_spec.component);

                let task = NodeTask {
                    node_id,
                    execution_id: run.execution_id,
                    component,
                    ctx,
                    retry: node_spec.retry_policy.clone(),
                    timeout: node_timeout,
                    checks,
                    fingerprint,
                    cache: self.cache.clone(),
                    events: event_bus.clone(),
                };

                let handle = tokio::spawn(task.run());
                running.push(async move { (node_id, handle.await) });
            }

            // If nothing is running and nothing was started, we're done
            if running.is_empty() {
                break;
            }

            let Some((node_id, joined)) = running.next().await else {
                break;
            };

            let finished = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::error!("Node {} task aborted: {}", node_id, e);
                    NodeRun {
                        component: None,
                        result: Err(NodeError::ExecutionFailed(format!("Task join error: {}", e))),
                        duration_ms: 0,
                    }
                }
            };

            if let Some(component) = finished.component {
                instances.insert(node_id, component);
            }

            match finished.result {
                Ok(output) => {
                    tracing::info!(
                        "Node {} completed in {}ms{}",
                        node_id,
                        finished.duration_ms,
                        if output.metadata.cached { " (cached)" } else { "" }
                    );

                    event_bus.emit(ExecutionEvent::NodeCompleted {
                        execution_id: run.execution_id,
                        node_id,
                        outputs: output.outputs.clone(),
                        duration_ms: finished.duration_ms,
                        cached: output.metadata.cached,
                        timestamp: Utc::now(),
                    });

                    run.complete(graph, node_id, output);
                }
                Err(e) => {
                    let failure = NodeFailure::from(e);
                    if matches!(failure, NodeFailure::Execution { .. }) {
                        tracing::error!("Node {} failed: {}", node_id, failure);
                    }

                    let skipped =
                        run.fail(graph, node_id, failure.clone(), run_token.is_cancelled());
                    event_bus.emit(ExecutionEvent::NodeFailed {
                        execution_id: run.execution_id,
                        node_id,
                        failure: failure.clone(),
                        timestamp: Utc::now(),
                    });
                    for dependent in skipped {
                        tracing::debug!("Skipping node {}: upstream {} failed", dependent, node_id);
                        event_bus.emit(ExecutionEvent::NodeFailed {
                            execution_id: run.execution_id,
                            node_id: dependent,
                            failure: NodeFailure::Propagated { origin: node_id },
                            timestamp: Utc::now(),
                        });
                    }

                    if flow.settings.on_error == ErrorHandling::StopFlow
                        && matches!(failure, NodeFailure::Execution { .. })
                    {
                        tracing::warn!("Stopping flow after failure of node {}", node_id);
                        run_token.cancel();
                    }
                }
            }
        }

        if run_token.is_cancelled() {
            for node_id in graph.order() {
                if !run.outputs.contains_key(node_id) && !run.errors.contains_key(node_id) {
                    run.errors.insert(*node_id, NodeFailure::Cancelled);
                    event_bus.emit(ExecutionEvent::NodeFailed {
                        execution_id: run.execution_id,
                        node_id: *node_id,
                        failure: NodeFailure::Cancelled,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        Ok((run.into_result(flow.id, graph), instances))
    }
}

/// Per-run scheduling state. Lives for exactly one execution.
struct RunState {
    execution_id: ExecutionId,
    remaining_deps: HashMap<NodeId, usize>,
    ready: VecDeque<NodeId>,
    outputs: HashMap<NodeId, HashMap<String, Value>>,
    errors: HashMap<NodeId, NodeFailure>,
    cached: HashSet<NodeId>,
    order: Vec<NodeId>,
    total_nodes: usize,
}

impl RunState {
    fn new(flow: &Flow, graph: &FlowGraph, execution_id: ExecutionId) -> Self {
        let remaining_deps: HashMap<NodeId, usize> = graph
            .order()
            .iter()
            .map(|id| (*id, graph.predecessors(*id).len()))
            .collect();
        let ready = graph
            .order()
            .iter()
            .copied()
            .filter(|id| remaining_deps[id] == 0)
            .collect();

        Self {
            execution_id,
            remaining_deps,
            ready,
            outputs: HashMap::new(),
            errors: HashMap::new(),
            cached: HashSet::new(),
            order: Vec::new(),
            total_nodes: flow.nodes.len(),
        }
    }

    /// Publish outputs and release dependents whose producers are all done.
    fn complete(&mut self, graph: &FlowGraph, node_id: NodeId, output: ComponentOutput) {
        if output.metadata.cached {
            self.cached.insert(node_id);
        }
        self.outputs.insert(node_id, output.outputs);
        self.order.push(node_id);

        for successor in graph.successors(node_id) {
            if let Some(remaining) = self.remaining_deps.get_mut(&successor) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 && !self.errors.contains_key(&successor) {
                    self.ready.push_back(successor);
                }
            }
        }
    }

    /// Record a failure and mark every not-yet-decided dependent as skipped.
    /// Returns the newly skipped nodes. A node cancelled along with the run
    /// skips nothing; the end-of-run sweep marks its dependents cancelled.
    /// A node that reports cancellation on its own is treated like any
    /// other failure.
    fn fail(
        &mut self,
        graph: &FlowGraph,
        node_id: NodeId,
        failure: NodeFailure,
        run_cancelled: bool,
    ) -> Vec<NodeId> {
        let cancelled = failure == NodeFailure::Cancelled;
        self.errors.insert(node_id, failure);
        if cancelled && run_cancelled {
            return Vec::new();
        }

        let mut skipped = Vec::new();
        for dependent in graph.descendants(node_id) {
            if self.errors.contains_key(&dependent) || self.outputs.contains_key(&dependent) {
                continue;
            }
            self.errors
                .insert(dependent, NodeFailure::Propagated { origin: node_id });
            skipped.push(dependent);
        }
        self.ready.retain(|id| !skipped.contains(id));
        skipped
    }

    fn into_result(self, flow_id: FlowId, graph: &FlowGraph) -> ExecutionResult {
        ExecutionResult {
            execution_id: self.execution_id,
            flow_id,
            outputs: self.outputs,
            errors: self.errors,
            cached_nodes: self.cached,
            order: self.order,
            terminals: graph.terminals(),
            total_nodes: self.total_nodes,
            duration_ms: 0,
        }
    }
}

/// Output port expectations checked after each node attempt
struct OutputCheck {
    port: String,
    value_type: ValueType,
    wired: bool,
}

/// One node invocation, moved onto its own tokio task
struct NodeTask {
    node_id: NodeId,
    execution_id: ExecutionId,
    component: Box<dyn Component>,
    ctx: ComponentContext,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
    checks: Vec<OutputCheck>,
    fingerprint: Option<Fingerprint>,
    cache: ResultCache,
    events: EventBus,
}

struct NodeRun {
    /// Handed back so the executor can run its shutdown hook
    component: Option<Box<dyn Component>>,
    result: Result<ComponentOutput, NodeError>,
    duration_ms: u64,
}

impl NodeTask {
    async fn run(self) -> NodeRun {
        let start = Instant::now();
        let token = self.ctx.cancellation.clone();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(NodeError::Cancelled),
            result = self.invoke() => result,
        };

        NodeRun {
            component: Some(self.component),
            result,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn invoke(&self) -> Result<ComponentOutput, NodeError> {
        let Some(fingerprint) = self.fingerprint else {
            return self.attempt_with_retries().await;
        };

        let lookup = self
            .cache
            .get_or_compute(fingerprint, || self.attempt_with_retries())
            .await?;

        let mut output = (*lookup.output).clone();
        output.metadata.cached = !lookup.computed;
        Ok(output)
    }

    async fn attempt_with_retries(&self) -> Result<ComponentOutput, NodeError> {
        let policy = self.retry.clone().unwrap_or(RetryPolicy {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        });
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self.attempt().await.and_then(|out| self.check_outputs(out));

            match result {
                Ok(mut output) => {
                    output.metadata.attempts = attempt;
                    return Ok(output);
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    tracing::warn!(
                        "Node {} attempt {}/{} failed: {}",
                        self.node_id,
                        attempt,
                        max_attempts,
                        e
                    );
                    self.events.emit(ExecutionEvent::NodeRetrying {
                        execution_id: self.execution_id,
                        node_id: self.node_id,
                        attempt,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self) -> Result<ComponentOutput, NodeError> {
        let start = Instant::now();
        let execution = self.component.execute(self.ctx.clone());

        let mut output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(NodeError::Timeout {
                        millis: limit.as_millis() as u64,
                    })
                }
            },
            None => execution.await?,
        };
        output.metadata.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Declared outputs must carry their declared type; wired ones must exist.
    fn check_outputs(&self, output: ComponentOutput) -> Result<ComponentOutput, NodeError> {
        for check in &self.checks {
            match output.outputs.get(&check.port) {
                Some(value) if !value.matches(check.value_type) => {
                    return Err(NodeError::InvalidOutput {
                        port: check.port.clone(),
                        reason: format!("expected {}, got {}", check.value_type, value.kind()),
                    });
                }
                None if check.wired => {
                    return Err(NodeError::InvalidOutput {
                        port: check.port.clone(),
                        reason: "not produced".to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(output)
    }
}

/// Overlay run inputs on a copy of the flow.
///
/// A key `node.port` (node name or id) targets one node. A plain key feeds
/// every source node that declares an input port with that name.
fn apply_run_inputs(
    flow: &Flow,
    registry: &ComponentRegistry,
    run_inputs: HashMap<String, Value>,
) -> Flow {
    let mut flow = flow.clone();
    if run_inputs.is_empty() {
        return flow;
    }

    let sources: HashSet<NodeId> = flow.source_nodes().map(|n| n.id).collect();

    for (key, value) in run_inputs {
        if let Some((target, port)) = key.split_once('.') {
            let node = flow
                .nodes
                .iter_mut()
                .find(|n| n.id.to_string() == target || n.name.as_deref() == Some(target));
            if let Some(node) = node {
                node.inputs.insert(port.to_string(), value);
                continue;
            }
        }

        for node in flow.nodes.iter_mut().filter(|n| sources.contains(&n.id)) {
            let declares_port = registry
                .descriptor(&node.component)
                .is_some_and(|d| d.input_port(&key).is_some());
            if declares_port {
                node.inputs.insert(key.clone(), value.clone());
            }
        }
    }

    flow
}

/// Resolve a node's inputs: descriptor defaults, then literals, then edges.
/// A `Null` literal leaves the default in place.
fn collect_node_inputs(
    node_id: NodeId,
    flow: &Flow,
    graph: &FlowGraph,
    registry: &ComponentRegistry,
    node_outputs: &HashMap<NodeId, HashMap<String, Value>>,
) -> HashMap<String, Value> {
    let mut inputs = HashMap::new();
    let Some(node_spec) = flow.find_node(node_id) else {
        return inputs;
    };

    if let Some(descriptor) = registry.descriptor(&node_spec.component) {
        for port in &descriptor.inputs {
            if let Some(default) = &port.default {
                inputs.insert(port.name.clone(), default.clone());
            }
        }
    }

    inputs.extend(
        node_spec
            .inputs
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(port, value)| (port.clone(), value.clone())),
    );

    for edge in graph.incoming_edges(node_id) {
        if let Some(value) = node_outputs
            .get(&edge.from_node)
            .and_then(|outputs| outputs.get(&edge.from_port))
        {
            inputs.insert(edge.to_port.clone(), value.clone());
        }
    }

    inputs
}

async fn shutdown_all(instances: HashMap<NodeId, Box<dyn Component>>) {
    for (node_id, mut component) in instances {
        if let Err(e) = component.shutdown().await {
            tracing::warn!("Shutdown of node {} failed: {}", node_id, e);
        }
    }
}

/// Result of a flow run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    /// Outputs of every node that completed
    pub outputs: HashMap<NodeId, HashMap<String, Value>>,
    /// Every node that did not complete, and why
    pub errors: HashMap<NodeId, NodeFailure>,
    /// Nodes whose outputs came from the result cache
    pub cached_nodes: HashSet<NodeId>,
    /// Completion order
    pub order: Vec<NodeId>,
    /// Nodes without consumers
    pub terminals: Vec<NodeId>,
    pub total_nodes: usize,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn completed_nodes(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, node: NodeId, port: &str) -> Option<&Value> {
        self.outputs.get(&node).and_then(|o| o.get(port))
    }

    /// Outputs of terminal nodes that completed
    pub fn terminal_outputs(&self) -> HashMap<NodeId, &HashMap<String, Value>> {
        self.terminals
            .iter()
            .filter_map(|id| self.outputs.get(id).map(|o| (*id, o)))
            .collect()
    }

    /// Failures that originated at a node rather than upstream
    pub fn root_failures(&self) -> impl Iterator<Item = (&NodeId, &NodeFailure)> {
        self.errors.iter().filter(|(_, f)| !f.is_propagated())
    }
}
