use crate::provider::{EmbeddingModel, Handle, ModelEndpoint, Provider, ProviderClient};
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentFactory, PortDefinition};
use std::collections::HashMap;

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi | Provider::AzureOpenAi => "text-embedding-3-small",
        Provider::Ollama => "nomic-embed-text",
        Provider::HuggingFace => "sentence-transformers/all-MiniLM-L6-v2",
    }
}

fn embedding_model(
    provider: Provider,
    config: &HashMap<String, Value>,
) -> Result<EmbeddingModel, NodeError> {
    Ok(EmbeddingModel {
        endpoint: ModelEndpoint::from_config(provider, config, default_model(provider))?,
        dimensions: config
            .get("dimensions")
            .and_then(Value::as_f64)
            .map(|d| d as u32),
    })
}

/// Emits an embedding model handle built from its config
pub struct EmbeddingsNode {
    component_type: String,
    model: EmbeddingModel,
}

#[async_trait]
impl Component for EmbeddingsNode {
    fn component_type(&self) -> &str {
        &self.component_type
    }

    async fn execute(&self, _ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        Ok(ComponentOutput::new().with_output("embeddings", self.model.to_value()))
    }
}

/// Factory for one provider's embeddings component, or for the generic
/// `embeddings.model` when `provider` is `None`.
pub struct EmbeddingsFactory {
    provider: Option<Provider>,
    descriptor: ComponentDescriptor,
}

impl EmbeddingsFactory {
    pub fn for_provider(provider: Provider) -> Self {
        let (name, display) = match provider {
            Provider::OpenAi => ("embeddings.openai", "OpenAI Embeddings"),
            Provider::AzureOpenAi => ("embeddings.azure_openai", "Azure OpenAI Embeddings"),
            Provider::Ollama => ("embeddings.ollama", "Ollama Embeddings"),
            Provider::HuggingFace => ("embeddings.huggingface", "Hugging Face Embeddings"),
        };
        Self {
            provider: Some(provider),
            descriptor: ComponentDescriptor::new(name, "embeddings")
                .display_name(display)
                .description(format!(
                    "Embedding model served by {}",
                    provider.name()
                ))
                .output(handle_port()),
        }
    }

    pub fn generic() -> Self {
        Self {
            provider: None,
            descriptor: ComponentDescriptor::new("embeddings.model", "embeddings")
                .display_name("Embedding Model")
                .description("Embedding model from any supported provider, chosen by 'provider'")
                .output(handle_port()),
        }
    }
}

fn handle_port() -> PortDefinition {
    PortDefinition::required("embeddings", ValueType::Embeddings)
        .describe("Embedding model handle")
}

impl ComponentFactory for EmbeddingsFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => Provider::parse(
                config
                    .get("provider")
                    .and_then(Value::as_str)
                    .unwrap_or("openai"),
            )?,
        };
        Ok(Box::new(EmbeddingsNode {
            component_type: self.descriptor.component_type.clone(),
            model: embedding_model(provider, config)?,
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}

/// Embeds a text with the model on its `embeddings` port
pub struct TextEmbedderNode {
    client: ProviderClient,
}

#[async_trait]
impl Component for TextEmbedderNode {
    fn component_type(&self) -> &str {
        "embeddings.text_embedder"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let model = EmbeddingModel::from_value("embeddings", ctx.require_input("embeddings")?)?;
        let text = ctx.require_text("text")?;

        let mut vectors = self.client.embed(&model, &[text.to_string()]).await?;
        let vector = vectors.pop().unwrap_or_default();
        ctx.events
            .info(format!("Embedded {} chars into {} dims", text.len(), vector.len()));

        Ok(ComponentOutput::new()
            .with_output("dimensions", vector.len() as f64)
            .with_output("vector", vector))
    }
}

pub struct TextEmbedderFactory {
    client: ProviderClient,
    descriptor: ComponentDescriptor,
}

impl TextEmbedderFactory {
    pub fn new(client: ProviderClient) -> Self {
        Self {
            client,
            descriptor: ComponentDescriptor::new("embeddings.text_embedder", "embeddings")
                .display_name("Text Embedder")
                .description("Embed a text with a connected embedding model")
                .input(PortDefinition::required("embeddings", ValueType::Embeddings))
                .input(PortDefinition::required("text", ValueType::Text))
                .output(PortDefinition::required("vector", ValueType::Vector))
                .output(PortDefinition::optional("dimensions", ValueType::Number))
                .cacheable(),
        }
    }
}

impl ComponentFactory for TextEmbedderFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(TextEmbedderNode {
            client: self.client.clone(),
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    Manhattan,
}

impl DistanceMetric {
    pub fn parse(name: &str) -> Result<Self, NodeError> {
        match name.to_lowercase().as_str() {
            "cosine" | "cosine similarity" => Ok(DistanceMetric::Cosine),
            "euclidean" | "euclidean distance" => Ok(DistanceMetric::Euclidean),
            "manhattan" | "manhattan distance" => Ok(DistanceMetric::Manhattan),
            other => Err(NodeError::Configuration(format!(
                "Unknown similarity metric: {}",
                other
            ))),
        }
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> f64 {
        let pairs = a.iter().zip(b).map(|(x, y)| (*x as f64, *y as f64));
        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            DistanceMetric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct SimilarityNode {
    metric: DistanceMetric,
}

#[async_trait]
impl Component for SimilarityNode {
    fn component_type(&self) -> &str {
        "embeddings.similarity"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let a = ctx.require_vector("vector_a")?;
        let b = ctx.require_vector("vector_b")?;
        if a.len() != b.len() {
            return Err(NodeError::ExecutionFailed(format!(
                "Vectors differ in length: {} vs {}",
                a.len(),
                b.len()
            )));
        }

        Ok(ComponentOutput::new().with_output("score", self.metric.score(&a, &b)))
    }
}

pub struct SimilarityFactory {
    descriptor: ComponentDescriptor,
}

impl SimilarityFactory {
    pub fn new() -> Self {
        Self {
            descriptor: ComponentDescriptor::new("embeddings.similarity", "embeddings")
                .display_name("Embedding Similarity")
                .description("Compare two vectors by cosine, euclidean or manhattan metric")
                .input(PortDefinition::required("vector_a", ValueType::Vector))
                .input(PortDefinition::required("vector_b", ValueType::Vector))
                .output(PortDefinition::required("score", ValueType::Number)),
        }
    }
}

impl Default for SimilarityFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory for SimilarityFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        let metric = config
            .get("metric")
            .and_then(Value::as_str)
            .map(DistanceMetric::parse)
            .transpose()?
            .unwrap_or(DistanceMetric::Cosine);
        Ok(Box::new(SimilarityNode { metric }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
