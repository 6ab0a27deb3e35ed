use crate::provider::{ChatModel, ChatPrompt, Handle, ModelEndpoint, Provider, ProviderClient};
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentFactory, PortDefinition};
use std::collections::HashMap;

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi | Provider::AzureOpenAi => "gpt-4o-mini",
        Provider::Ollama => "llama3.2",
        Provider::HuggingFace => "meta-llama/Llama-3.2-3B-Instruct",
    }
}

/// Language model component.
///
/// Always emits its handle on `model`. When `input_value` is non-empty it
/// also runs a completion and emits the reply on `text_output`.
pub struct LanguageModelNode {
    component_type: String,
    model: ChatModel,
    system_message: Option<String>,
    client: ProviderClient,
}

#[async_trait]
impl Component for LanguageModelNode {
    fn component_type(&self) -> &str {
        &self.component_type
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let mut output = ComponentOutput::new().with_output("model", self.model.to_value());

        let Some(input) = ctx.text_input("input_value") else {
            return Ok(output);
        };

        let prompt = ChatPrompt {
            system: ctx
                .text_input("system_message")
                .map(str::to_string)
                .or_else(|| self.system_message.clone()),
            user: input.to_string(),
        };

        ctx.events.info(format!(
            "Prompting {} {}",
            self.model.endpoint.provider.name(),
            self.model.endpoint.model
        ));
        let reply = self.client.complete(&self.model, &prompt).await?;

        output = output.with_output("text_output", reply);
        Ok(output)
    }
}

pub struct LanguageModelFactory {
    provider: Provider,
    client: ProviderClient,
    descriptor: ComponentDescriptor,
}

impl LanguageModelFactory {
    pub fn new(provider: Provider, client: ProviderClient) -> Self {
        let (name, display) = match provider {
            Provider::OpenAi => ("models.openai", "OpenAI"),
            Provider::AzureOpenAi => ("models.azure_openai", "Azure OpenAI"),
            Provider::Ollama => ("models.ollama", "Ollama"),
            Provider::HuggingFace => ("models.huggingface", "Hugging Face"),
        };

        Self {
            provider,
            client,
            descriptor: ComponentDescriptor::new(name, "models")
                .display_name(display)
                .description(format!("Chat model served by {}", provider.name()))
                .input(
                    PortDefinition::optional("input_value", ValueType::Text)
                        .describe("Prompt; when empty only the model handle is produced"),
                )
                .input(PortDefinition::optional("system_message", ValueType::Text))
                .output(PortDefinition::required("model", ValueType::LanguageModel))
                .output(
                    PortDefinition::optional("text_output", ValueType::Text)
                        .describe("Model reply to input_value"),
                )
                .cacheable(),
        }
    }
}

impl ComponentFactory for LanguageModelFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        let endpoint = ModelEndpoint::from_config(self.provider, config, default_model(self.provider))?;

        let temperature = config
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(0.1);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(NodeError::Configuration(format!(
                "temperature must be between 0 and 2, got {}",
                temperature
            )));
        }

        Ok(Box::new(LanguageModelNode {
            component_type: self.descriptor.component_type.clone(),
            model: ChatModel {
                endpoint,
                temperature,
                max_tokens: config
                    .get("max_tokens")
                    .and_then(Value::as_f64)
                    .map(|n| n as u32),
            },
            system_message: config
                .get("system_message")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            client: self.client.clone(),
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
