#![allow(dead_code)]

use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentRegistry, PortDefinition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records what the test components did
#[derive(Default)]
pub struct Probe {
    pub executed: Mutex<Vec<String>>,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl Probe {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn ran(&self, label: &str) -> bool {
        self.executed().iter().any(|l| l == label)
    }

    pub fn count(&self, label: &str) -> usize {
        self.executed().iter().filter(|l| *l == label).count()
    }
}

/// `out = in + add`, with optional delay and injected failures.
/// `bail` makes the node report cancellation on its own.
pub struct StepNode {
    label: String,
    add: f64,
    delay_ms: u64,
    fail: bool,
    bail: bool,
    fail_times: u32,
    failures: AtomicU32,
    probe: Arc<Probe>,
}

impl StepNode {
    fn from_config(config: &HashMap<String, Value>, probe: Arc<Probe>) -> Self {
        let num = |key: &str| config.get(key).and_then(Value::as_f64);
        Self {
            label: config
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or("step")
                .to_string(),
            add: num("add").unwrap_or(1.0),
            delay_ms: num("delay_ms").unwrap_or(0.0) as u64,
            fail: config.get("fail").and_then(Value::as_bool).unwrap_or(false),
            bail: config.get("bail").and_then(Value::as_bool).unwrap_or(false),
            fail_times: num("fail_times").unwrap_or(0.0) as u32,
            failures: AtomicU32::new(0),
            probe,
        }
    }
}

#[async_trait]
impl Component for StepNode {
    fn component_type(&self) -> &str {
        "test.step"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(running, Ordering::SeqCst);
        self.probe.executed.lock().unwrap().push(self.label.clone());

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.probe.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(NodeError::ExecutionFailed(format!("{} exploded", self.label)));
        }
        if self.bail {
            return Err(NodeError::Cancelled);
        }
        if self.failures.fetch_add(1, Ordering::SeqCst) < self.fail_times {
            return Err(NodeError::provider("flaky", "temporarily unavailable"));
        }

        let input = ctx.inputs.get("in").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(ComponentOutput::new().with_output("out", input + self.add))
    }
}

/// `sum = a + b`
pub struct SumNode;

#[async_trait]
impl Component for SumNode {
    fn component_type(&self) -> &str {
        "test.sum"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let a = ctx.require_input("a")?.as_f64().unwrap_or(0.0);
        let b = ctx.require_input("b")?.as_f64().unwrap_or(0.0);
        Ok(ComponentOutput::new().with_output("sum", a + b))
    }
}

/// Echoes text, or returns a number on a text port when `lie` is set
pub struct EchoNode {
    lie: bool,
}

#[async_trait]
impl Component for EchoNode {
    fn component_type(&self) -> &str {
        "test.echo"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        if self.lie {
            return Ok(ComponentOutput::new().with_output("text", 42.0));
        }
        let text = ctx.require_text("text")?;
        Ok(ComponentOutput::new().with_output("text", text.to_uppercase()))
    }
}

fn step_descriptor(component_type: &str) -> ComponentDescriptor {
    ComponentDescriptor::new(component_type, "test")
        .input(PortDefinition::optional("in", ValueType::Number))
        .output(PortDefinition::required("out", ValueType::Number))
}

pub fn registry(probe: Arc<Probe>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();

    let step_probe = probe.clone();
    registry
        .register_fn(step_descriptor("test.step"), move |config| {
            Ok(Box::new(StepNode::from_config(config, step_probe.clone())))
        })
        .unwrap();

    let cached_probe = probe.clone();
    registry
        .register_fn(step_descriptor("test.cached").cacheable(), move |config| {
            Ok(Box::new(StepNode::from_config(config, cached_probe.clone())))
        })
        .unwrap();

    registry
        .register_fn(
            ComponentDescriptor::new("test.sum", "test")
                .input(PortDefinition::required("a", ValueType::Number))
                .input(PortDefinition::required("b", ValueType::Number).with_default(0.0))
                .output(PortDefinition::required("sum", ValueType::Number)),
            |_| Ok(Box::new(SumNode)),
        )
        .unwrap();

    registry
        .register_fn(
            ComponentDescriptor::new("test.echo", "test")
                .input(PortDefinition::required("text", ValueType::Text))
                .output(PortDefinition::required("text", ValueType::Text)),
            |config| {
                let lie = config.get("lie").and_then(Value::as_bool).unwrap_or(false);
                Ok(Box::new(EchoNode { lie }))
            },
        )
        .unwrap();

    registry
}
