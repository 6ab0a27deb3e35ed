//! Standard component library
//!
//! Embedding and chat model providers, tools, vector stores and text I/O.

pub mod embeddings;
mod io;
pub mod models;
pub mod provider;
pub mod tools;
pub mod vectorstores;

pub use embeddings::{EmbeddingsFactory, SimilarityFactory, TextEmbedderFactory};
pub use io::{TextInputFactory, TextInputNode, TextOutputFactory, TextOutputNode};
pub use models::LanguageModelFactory;
pub use provider::{ChatModel, EmbeddingModel, Handle, Provider, ProviderClient};
pub use tools::{CalculatorFactory, DuckDuckGoFactory, ToolSpec};
pub use vectorstores::{LocalCollections, LocalVectorStoreFactory, QdrantFactory};

use linkcore::RegistryError;
use linkruntime::ComponentRegistry;
use std::sync::Arc;

const PROVIDERS: [Provider; 4] = [
    Provider::OpenAi,
    Provider::AzureOpenAi,
    Provider::Ollama,
    Provider::HuggingFace,
];

/// Register all standard components with a registry
pub fn register_all(registry: &mut ComponentRegistry) -> Result<(), RegistryError> {
    register_all_with(registry, LocalCollections::new())
}

/// Like [`register_all`], with the local vector store backed by `collections`
pub fn register_all_with(
    registry: &mut ComponentRegistry,
    collections: LocalCollections,
) -> Result<(), RegistryError> {
    let http = reqwest::Client::new();
    let client = ProviderClient::new();

    for provider in PROVIDERS {
        registry.register(Arc::new(EmbeddingsFactory::for_provider(provider)))?;
        registry.register(Arc::new(LanguageModelFactory::new(provider, client.clone())))?;
    }
    registry.register(Arc::new(EmbeddingsFactory::generic()))?;
    registry.register(Arc::new(TextEmbedderFactory::new(client.clone())))?;
    registry.register(Arc::new(SimilarityFactory::new()))?;

    registry.register(Arc::new(CalculatorFactory::new()))?;
    registry.register(Arc::new(DuckDuckGoFactory::new(http.clone())))?;

    registry.register(Arc::new(LocalVectorStoreFactory::new(collections, client.clone())))?;
    registry.register(Arc::new(QdrantFactory::new(http, client)))?;

    registry.register(Arc::new(TextInputFactory::new()))?;
    registry.register(Arc::new(TextOutputFactory::new()))?;

    tracing::debug!("Registered {} standard components", registry.len());
    Ok(())
}
