use super::{descriptor, ingest_texts, number_of_results, results_text, ScoredText};
use crate::embeddings::cosine_similarity;
use crate::provider::{EmbeddingModel, Handle, ProviderClient};
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value};
use linkruntime::{ComponentDescriptor, ComponentFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoredText {
    text: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Collection {
    dimensions: Option<usize>,
    entries: Vec<StoredText>,
}

/// In-memory collections shared by every `vectorstores.local` node of a
/// registry. Contents live as long as the process.
#[derive(Clone, Default)]
pub struct LocalCollections {
    inner: Arc<RwLock<HashMap<String, Collection>>>,
}

impl LocalCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.inner
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.entries.len())
    }

    pub async fn clear(&self, collection: &str) {
        self.inner.write().await.remove(collection);
    }

    async fn insert(
        &self,
        collection: &str,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, NodeError> {
        let mut collections = self.inner.write().await;
        let target = collections.entry(collection.to_string()).or_default();

        for vector in &vectors {
            match target.dimensions {
                Some(dims) if dims != vector.len() => {
                    return Err(NodeError::ExecutionFailed(format!(
                        "Collection '{}' holds {}-dim vectors, got {}",
                        collection,
                        dims,
                        vector.len()
                    )));
                }
                Some(_) => {}
                None => target.dimensions = Some(vector.len()),
            }
        }

        let count = texts.len();
        target.entries.extend(
            texts
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| StoredText { text, vector }),
        );
        Ok(count)
    }

    async fn search(&self, collection: &str, query: &[f32], limit: usize) -> Vec<ScoredText> {
        let collections = self.inner.read().await;
        let Some(target) = collections.get(collection) else {
            return Vec::new();
        };

        let mut hits: Vec<ScoredText> = target
            .entries
            .iter()
            .filter(|e| e.vector.len() == query.len())
            .map(|e| ScoredText {
                text: e.text.clone(),
                score: cosine_similarity(&e.vector, query),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}

pub struct LocalVectorStoreNode {
    collections: LocalCollections,
    client: ProviderClient,
    collection: String,
    limit: usize,
}

#[async_trait]
impl Component for LocalVectorStoreNode {
    fn component_type(&self) -> &str {
        "vectorstores.local"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let model = EmbeddingModel::from_value("embeddings", ctx.require_input("embeddings")?)?;

        let texts = ingest_texts(&ctx)?;
        let mut ingested = 0;
        if !texts.is_empty() {
            let vectors = self.client.embed(&model, &texts).await?;
            ingested = self.collections.insert(&self.collection, texts, vectors).await?;
            ctx.events
                .info(format!("Ingested {} text(s) into '{}'", ingested, self.collection));
        }

        let mut hits = Vec::new();
        if let Some(query) = ctx.text_input("search_query") {
            let query_vector = self
                .client
                .embed(&model, &[query.to_string()])
                .await?
                .pop()
                .unwrap_or_default();
            hits = self
                .collections
                .search(&self.collection, &query_vector, self.limit)
                .await;
            tracing::debug!("Local search in '{}' matched {} text(s)", self.collection, hits.len());
        }

        Ok(ComponentOutput::new()
            .with_output("ingested", ingested as f64)
            .with_output("text", results_text(&hits))
            .with_output(
                "search_results",
                Value::Array(hits.into_iter().map(Value::from).collect()),
            ))
    }
}

pub struct LocalVectorStoreFactory {
    collections: LocalCollections,
    client: ProviderClient,
    descriptor: ComponentDescriptor,
}

impl LocalVectorStoreFactory {
    pub fn new(collections: LocalCollections, client: ProviderClient) -> Self {
        Self {
            collections,
            client,
            descriptor: descriptor(
                "vectorstores.local",
                "Local Vector Store",
                "In-process collection with cosine top-k search",
            ),
        }
    }
}

impl ComponentFactory for LocalVectorStoreFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(LocalVectorStoreNode {
            collections: self.collections.clone(),
            client: self.client.clone(),
            collection: config
                .get("collection")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string(),
            limit: number_of_results(config),
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
