use super::{descriptor, ingest_texts, number_of_results, results_text, ScoredText};
use crate::provider::{send, EmbeddingModel, Handle, ProviderClient};
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value};
use linkruntime::{ComponentDescriptor, ComponentFactory};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

pub const QDRANT_URL: &str = "http://localhost:6333";

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchPoint>,
}

#[derive(Deserialize)]
struct SearchPoint {
    score: f64,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

/// Qdrant collection over its REST API
pub struct QdrantNode {
    http: reqwest::Client,
    embedder: ProviderClient,
    url: String,
    collection: String,
    api_key: Option<String>,
    limit: usize,
}

impl QdrantNode {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.request(
            method,
            format!("{}/collections/{}{}", self.url, self.collection, path),
        );
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    /// Create the collection on first use
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), NodeError> {
        let existing = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(|e| NodeError::provider("qdrant", format!("request failed: {}", e)))?;
        if existing.status().is_success() {
            return Ok(());
        }
        if existing.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(NodeError::provider(
                "qdrant",
                format!("HTTP {} checking collection '{}'", existing.status().as_u16(), self.collection),
            ));
        }

        tracing::info!("Creating Qdrant collection '{}' ({} dims)", self.collection, dimensions);
        let create = self
            .request(reqwest::Method::PUT, "")
            .json(&json!({ "vectors": { "size": dimensions, "distance": "Cosine" } }));
        send::<serde_json::Value>("qdrant", create).await?;
        Ok(())
    }

    async fn upsert(&self, texts: Vec<String>, vectors: Vec<Vec<f32>>) -> Result<usize, NodeError> {
        let Some(dimensions) = vectors.first().map(Vec::len) else {
            return Ok(0);
        };
        self.ensure_collection(dimensions).await?;

        let points: Vec<serde_json::Value> = texts
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": { "text": text },
                })
            })
            .collect();
        let count = points.len();

        let upsert = self
            .request(reqwest::Method::PUT, "/points")
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }));
        send::<serde_json::Value>("qdrant", upsert).await?;
        Ok(count)
    }

    async fn search(&self, vector: Vec<f32>) -> Result<Vec<ScoredText>, NodeError> {
        let search = self
            .request(reqwest::Method::POST, "/points/search")
            .json(&json!({
                "vector": vector,
                "limit": self.limit,
                "with_payload": true,
            }));
        let response: SearchResponse = send("qdrant", search).await?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredText {
                text: point
                    .payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: point.score,
            })
            .collect())
    }
}

#[async_trait]
impl Component for QdrantNode {
    fn component_type(&self) -> &str {
        "vectorstores.qdrant"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let model = EmbeddingModel::from_value("embeddings", ctx.require_input("embeddings")?)?;

        let texts = ingest_texts(&ctx)?;
        let mut ingested = 0;
        if !texts.is_empty() {
            let vectors = self.embedder.embed(&model, &texts).await?;
            ingested = self.upsert(texts, vectors).await?;
            ctx.events
                .info(format!("Upserted {} point(s) into '{}'", ingested, self.collection));
        }

        let mut hits = Vec::new();
        if let Some(query) = ctx.text_input("search_query") {
            let vector = self
                .embedder
                .embed(&model, &[query.to_string()])
                .await?
                .pop()
                .unwrap_or_default();
            hits = self.search(vector).await?;
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

pub struct QdrantFactory {
    http: reqwest::Client,
    embedder: ProviderClient,
    descriptor: ComponentDescriptor,
}

impl QdrantFactory {
    pub fn new(http: reqwest::Client, embedder: ProviderClient) -> Self {
        Self {
            http,
            embedder,
            descriptor: descriptor(
                "vectorstores.qdrant",
                "Qdrant",
                "Qdrant collection: upsert texts and search by similarity",
            ),
        }
    }
}

impl ComponentFactory for QdrantFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        let collection = config
            .get("collection_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NodeError::Configuration("Missing 'collection_name' config".into()))?;

        Ok(Box::new(QdrantNode {
            http: self.http.clone(),
            embedder: self.embedder.clone(),
            url: config
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or(QDRANT_URL)
                .trim_end_matches('/')
                .to_string(),
            collection: collection.to_string(),
            api_key: config
                .get("api_key")
                .and_then(Value::as_str)
                .map(str::to_string),
            limit: number_of_results(config),
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
