mod common;

use common::{registry, Probe};
use linkcore::{
    ErrorHandling, EventBus, ExecutionEvent, Flow, FlowError, GraphError, NodeError, NodeFailure,
    NodeSpec, RetryPolicy, Value,
};
use linkruntime::{FlowExecutor, FlowRuntime, ResultCache, RuntimeConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn step(label: &str) -> NodeSpec {
    NodeSpec::new("test.step")
        .with_name(label)
        .with_config("label", label)
}

fn runtime(probe: Arc<Probe>, max_parallel: usize) -> FlowRuntime {
    FlowRuntime::with_registry(
        Arc::new(registry(probe)),
        RuntimeConfig {
            max_parallel_nodes: max_parallel,
            ..RuntimeConfig::default()
        },
    )
}

#[tokio::test]
async fn test_chain_produces_terminal_outputs() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("chain");
    let a = flow.add_node(step("a").with_config("add", 1.0));
    let b = flow.add_node(step("b").with_config("add", 10.0));
    let c = flow.add_node(step("c").with_config("add", 100.0));
    flow.connect(a, "out", b, "in");
    flow.connect(b, "out", c, "in");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.order, vec![a, b, c]);
    assert_eq!(result.output(c, "out"), Some(&Value::Number(111.0)));
    let terminal = result.terminal_outputs();
    assert_eq!(terminal.len(), 1);
    assert!(terminal.contains_key(&c));
    assert_eq!(probe.executed(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failure_propagates_down_the_chain() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("failing chain");
    let a = flow.add_node(step("a").with_config("fail", true));
    let b = flow.add_node(step("b"));
    let c = flow.add_node(step("c"));
    flow.connect(a, "out", b, "in");
    flow.connect(b, "out", c, "in");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.outputs.is_empty());
    assert_eq!(result.errors.len(), 3);
    assert!(matches!(
        result.errors[&a],
        NodeFailure::Execution {
            error: NodeError::ExecutionFailed(_)
        }
    ));
    assert_eq!(result.errors[&b], NodeFailure::Propagated { origin: a });
    assert_eq!(result.errors[&c], NodeFailure::Propagated { origin: a });
    assert_eq!(probe.executed(), vec!["a"]);
}

#[tokio::test]
async fn test_self_cancelled_node_skips_dependents() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("bailing node");
    let a = flow.add_node(step("a").with_config("bail", true));
    let b = flow.add_node(step("b"));
    let c = flow.add_node(step("c"));
    flow.connect(a, "out", b, "in");
    flow.connect(b, "out", c, "in");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.outputs.is_empty());
    assert_eq!(result.errors[&a], NodeFailure::Cancelled);
    assert_eq!(result.errors[&b], NodeFailure::Propagated { origin: a });
    assert_eq!(result.errors[&c], NodeFailure::Propagated { origin: a });
    assert_eq!(probe.executed(), vec!["a"]);
}

#[tokio::test]
async fn test_null_literal_keeps_port_default() {
    let runtime = runtime(Arc::new(Probe::default()), 4);

    let mut flow = Flow::new("null literal");
    let sum = flow.add_node(
        NodeSpec::new("test.sum")
            .with_input("a", 1.0)
            .with_input("b", Value::Null),
    );

    runtime.validate(&flow).unwrap();
    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(result.output(sum, "sum"), Some(&Value::Number(1.0)));
}

#[tokio::test]
async fn test_independent_branch_completes() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("two branches");
    let bad = flow.add_node(step("bad").with_config("fail", true));
    let bad_child = flow.add_node(step("bad_child"));
    let good = flow.add_node(step("good").with_config("delay_ms", 20.0));
    let good_child = flow.add_node(step("good_child"));
    flow.connect(bad, "out", bad_child, "in");
    flow.connect(good, "out", good_child, "in");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(!result.is_success());
    assert_eq!(result.output(good_child, "out"), Some(&Value::Number(2.0)));
    assert_eq!(
        result.errors[&bad_child],
        NodeFailure::Propagated { origin: bad }
    );
    assert_eq!(result.root_failures().count(), 1);
    assert!(!probe.ran("bad_child"));
}

#[tokio::test]
async fn test_diamond_waits_for_both_producers() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("diamond");
    let root = flow.add_node(step("root"));
    let left = flow.add_node(step("left").with_config("delay_ms", 30.0));
    let right = flow.add_node(step("right").with_config("add", 5.0));
    let sum = flow.add_node(NodeSpec::new("test.sum"));
    flow.connect(root, "out", left, "in");
    flow.connect(root, "out", right, "in");
    flow.connect(left, "out", sum, "a");
    flow.connect(right, "out", sum, "b");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.is_success());
    // root = 1, left = 2, right = 6
    assert_eq!(result.output(sum, "sum"), Some(&Value::Number(8.0)));
    assert_eq!(result.order.last(), Some(&sum));
}

#[tokio::test]
async fn test_failed_producer_skips_fan_in() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("fan-in");
    let ok = flow.add_node(step("ok"));
    let broken = flow.add_node(step("broken").with_config("fail", true));
    let sum = flow.add_node(NodeSpec::new("test.sum"));
    flow.connect(ok, "out", sum, "a");
    flow.connect(broken, "out", sum, "b");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.outputs.contains_key(&ok));
    assert_eq!(
        result.errors[&sum],
        NodeFailure::Propagated { origin: broken }
    );
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 2);

    let mut flow = Flow::new("wide");
    for i in 0..6 {
        flow.add_node(step(&format!("n{}", i)).with_config("delay_ms", 30.0));
    }

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(result.completed_nodes(), 6);
    assert_eq!(
        probe.max_running.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn test_flow_setting_overrides_pool_size() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 8);

    let mut flow = Flow::new("sequential");
    flow.settings.max_parallel_nodes = Some(1);
    for i in 0..3 {
        flow.add_node(step(&format!("n{}", i)).with_config("delay_ms", 10.0));
    }

    runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(
        probe.max_running.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_cycle_rejected_before_execution() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("cycle");
    let a = flow.add_node(step("a"));
    let b = flow.add_node(step("b"));
    flow.connect(a, "out", b, "in");
    flow.connect(b, "out", a, "in");

    let result = runtime.execute(&flow, HashMap::new()).await;

    assert!(matches!(
        result,
        Err(FlowError::Graph(GraphError::CyclicDependency { .. }))
    ));
    assert!(probe.executed().is_empty());
}

#[tokio::test]
async fn test_invalid_output_fails_producer() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);

    let mut flow = Flow::new("liar");
    let liar = flow.add_node(
        NodeSpec::new("test.echo")
            .with_config("lie", true)
            .with_input("text", "x"),
    );
    let echo = flow.add_node(NodeSpec::new("test.echo"));
    flow.connect(liar, "text", echo, "text");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(matches!(
        result.errors[&liar],
        NodeFailure::Execution {
            error: NodeError::InvalidOutput { .. }
        }
    ));
    assert_eq!(result.errors[&echo], NodeFailure::Propagated { origin: liar });
}

#[tokio::test]
async fn test_run_inputs_feed_source_nodes() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);

    let mut flow = Flow::new("inputs");
    let first = flow.add_node(step("first"));
    let second = flow.add_node(step("second"));
    flow.connect(first, "out", second, "in");

    let mut inputs = HashMap::new();
    inputs.insert("in".to_string(), Value::Number(40.0));

    let result = runtime.execute(&flow, inputs).await.unwrap();

    assert_eq!(result.output(first, "out"), Some(&Value::Number(41.0)));
    assert_eq!(result.output(second, "out"), Some(&Value::Number(42.0)));
}

#[tokio::test]
async fn test_targeted_run_input_by_node_name() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);

    let mut flow = Flow::new("targeted");
    let echo = flow.add_node(
        NodeSpec::new("test.echo")
            .with_name("greeting")
            .with_input("text", "default"),
    );

    let mut inputs = HashMap::new();
    inputs.insert("greeting.text".to_string(), Value::from("hello"));

    let result = runtime.execute(&flow, inputs).await.unwrap();

    assert_eq!(result.output(echo, "text"), Some(&Value::from("HELLO")));
}

#[tokio::test]
async fn test_retry_policy_recovers_flaky_node() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);
    let mut events = runtime.subscribe_events();

    let mut flow = Flow::new("flaky");
    let flaky = flow.add_node(
        step("flaky")
            .with_config("fail_times", 2.0)
            .with_retry(3, 5),
    );

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(probe.count("flaky"), 3);

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { node_id, .. } = event {
            assert_eq!(node_id, flaky);
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("hopeless");
    let node = flow.add_node(step("hopeless").with_config("fail_times", 5.0));
    flow.nodes[0].retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        delay_ms: 1,
        backoff_multiplier: 2.0,
    });

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(matches!(
        result.errors[&node],
        NodeFailure::Execution {
            error: NodeError::Provider { .. }
        }
    ));
    assert_eq!(probe.count("hopeless"), 2);
}

#[tokio::test]
async fn test_node_timeout() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);

    let mut flow = Flow::new("slow");
    flow.settings.node_timeout_ms = Some(20);
    let slow = flow.add_node(step("slow").with_config("delay_ms", 1000.0));

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(
        result.errors[&slow],
        NodeFailure::Execution {
            error: NodeError::Timeout { millis: 20 }
        }
    );
}

#[tokio::test]
async fn test_cancellation_stops_pending_work() {
    let probe = Arc::new(Probe::default());
    let executor = FlowExecutor::new(4, ResultCache::default());
    let registry = registry(probe.clone());
    let bus = EventBus::new(64);

    let mut flow = Flow::new("long");
    let slow = flow.add_node(step("slow").with_config("delay_ms", 5000.0));
    let after = flow.add_node(step("after"));
    flow.connect(slow, "out", after, "in");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = executor
        .execute(&flow, &registry, &bus, HashMap::new(), token)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.errors[&slow], NodeFailure::Cancelled);
    assert_eq!(result.errors[&after], NodeFailure::Cancelled);
    assert!(!probe.ran("after"));
}

#[tokio::test]
async fn test_stop_flow_cancels_other_branches() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("stop");
    flow.settings.on_error = ErrorHandling::StopFlow;
    let bad = flow.add_node(step("bad").with_config("fail", true));
    let slow = flow.add_node(step("slow").with_config("delay_ms", 5000.0));
    let slow_child = flow.add_node(step("slow_child"));
    flow.connect(slow, "out", slow_child, "in");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(matches!(result.errors[&bad], NodeFailure::Execution { .. }));
    assert_eq!(result.errors[&slow], NodeFailure::Cancelled);
    assert_eq!(result.errors[&slow_child], NodeFailure::Cancelled);
}

#[tokio::test]
async fn test_cacheable_nodes_reuse_results_across_runs() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("cached");
    let embed = flow.add_node(
        NodeSpec::new("test.cached")
            .with_config("label", "embed")
            .with_input("in", 1.0),
    );

    let first = runtime.execute(&flow, HashMap::new()).await.unwrap();
    let second = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(probe.count("embed"), 1);
    assert!(!first.cached_nodes.contains(&embed));
    assert!(second.cached_nodes.contains(&embed));
    assert_eq!(first.output(embed, "out"), second.output(embed, "out"));

    let mut changed = flow.clone();
    changed.nodes[0].inputs.insert("in".to_string(), Value::Number(2.0));
    runtime.execute(&changed, HashMap::new()).await.unwrap();
    assert_eq!(probe.count("embed"), 2);
}

#[tokio::test]
async fn test_cache_disabled_by_flow_settings() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe.clone(), 4);

    let mut flow = Flow::new("uncached");
    flow.settings.cache_enabled = false;
    flow.add_node(NodeSpec::new("test.cached").with_config("label", "embed"));

    runtime.execute(&flow, HashMap::new()).await.unwrap();
    runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(probe.count("embed"), 2);
}

#[tokio::test]
async fn test_events_follow_node_lifecycle() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);
    let mut events = runtime.subscribe_events();

    let mut flow = Flow::new("events");
    let a = flow.add_node(step("a").with_config("fail", true));
    let b = flow.add_node(step("b"));
    flow.connect(a, "out", b, "in");

    runtime.execute(&flow, HashMap::new()).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(ExecutionEvent::FlowStarted { .. })));
    assert!(matches!(
        seen.last(),
        Some(ExecutionEvent::FlowCompleted {
            success: false,
            failed_nodes: 2,
            ..
        })
    ));
    assert!(seen.iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeFailed { node_id, failure: NodeFailure::Propagated { origin }, .. }
            if *node_id == b && *origin == a
    )));
}

#[tokio::test]
async fn test_stored_flow_roundtrip() {
    let probe = Arc::new(Probe::default());
    let runtime = runtime(probe, 4);

    let mut flow = Flow::new("stored");
    let node = flow.add_node(step("only"));
    let id = runtime.register_flow(flow).await.unwrap();

    let result = runtime.execute_flow(id, HashMap::new()).await.unwrap();
    assert_eq!(result.output(node, "out"), Some(&Value::Number(1.0)));

    assert!(runtime.remove_flow(id).await.is_some());
    assert!(matches!(
        runtime.execute_flow(id, HashMap::new()).await,
        Err(FlowError::NotFound(_))
    ));
}
