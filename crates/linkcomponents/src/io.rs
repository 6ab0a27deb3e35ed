use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentFactory, PortDefinition};
use std::collections::HashMap;

/// Entry point for text supplied by the caller
pub struct TextInputNode;

#[async_trait]
impl Component for TextInputNode {
    fn component_type(&self) -> &str {
        "input.text"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let text = ctx.inputs.get("text").and_then(Value::as_str).unwrap_or("");
        Ok(ComponentOutput::new().with_output("text", text))
    }
}

pub struct TextInputFactory {
    descriptor: ComponentDescriptor,
}

impl TextInputFactory {
    pub fn new() -> Self {
        Self {
            descriptor: ComponentDescriptor::new("input.text", "io")
                .display_name("Text Input")
                .description("Pass a run input or literal text into the flow")
                .input(PortDefinition::optional("text", ValueType::Text).with_default(""))
                .output(PortDefinition::required("text", ValueType::Text)),
        }
    }
}

impl Default for TextInputFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory for TextInputFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(TextInputNode))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}

/// Terminal node that renders whatever reaches it as text
pub struct TextOutputNode;

#[async_trait]
impl Component for TextOutputNode {
    fn component_type(&self) -> &str {
        "output.text"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let text = match ctx.require_input("text")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => serde_json::to_string_pretty(&other.clone().into_json())
                .map_err(|e| NodeError::ExecutionFailed(format!("Cannot render output: {}", e)))?,
        };

        ctx.events.data("text", Value::String(text.clone()));
        Ok(ComponentOutput::new().with_output("text", text))
    }
}

pub struct TextOutputFactory {
    descriptor: ComponentDescriptor,
}

impl TextOutputFactory {
    pub fn new() -> Self {
        Self {
            descriptor: ComponentDescriptor::new("output.text", "io")
                .display_name("Text Output")
                .description("Collect a result as text")
                .input(PortDefinition::required("text", ValueType::Any))
                .output(PortDefinition::required("text", ValueType::Text)),
        }
    }
}

impl Default for TextOutputFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory for TextOutputFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(TextOutputNode))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
