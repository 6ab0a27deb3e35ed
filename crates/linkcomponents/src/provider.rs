//! Provider handles and the HTTP calls behind them.
//!
//! Embedding and language model components don't call anything themselves;
//! they emit a handle (a JSON description of provider, model and endpoint)
//! that downstream components pass back to [`ProviderClient`].

use linkcore::{NodeError, Value, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const AZURE_API_VERSION: &str = "2024-02-01";

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    Ollama,
    #[serde(rename = "huggingface")]
    HuggingFace,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, NodeError> {
        match name {
            "openai" => Ok(Provider::OpenAi),
            "azure_openai" | "azure" => Ok(Provider::AzureOpenAi),
            "ollama" => Ok(Provider::Ollama),
            "huggingface" | "hf" => Ok(Provider::HuggingFace),
            other => Err(NodeError::Configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::AzureOpenAi => "azure_openai",
            Provider::Ollama => "ollama",
            Provider::HuggingFace => "huggingface",
        }
    }

    /// Environment variable consulted when no API key is configured
    fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            Provider::Ollama => None,
            Provider::HuggingFace => Some("HUGGINGFACEHUB_API_TOKEN"),
        }
    }
}

/// Where and how to reach a model.
///
/// `base_url` is the API root for OpenAI, Ollama and Hugging Face, and the
/// resource endpoint for Azure, where `model` names the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ModelEndpoint {
    /// Build from node config. `model` falls back to `default_model`;
    /// Azure needs `endpoint` and `deployment` instead.
    pub fn from_config(
        provider: Provider,
        config: &HashMap<String, Value>,
        default_model: &str,
    ) -> Result<Self, NodeError> {
        let get = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let (model, base_url) = match provider {
            Provider::AzureOpenAi => {
                let endpoint = get("endpoint").ok_or_else(|| {
                    NodeError::Configuration("Azure OpenAI requires 'endpoint'".to_string())
                })?;
                let deployment = get("deployment").ok_or_else(|| {
                    NodeError::Configuration("Azure OpenAI requires 'deployment'".to_string())
                })?;
                (deployment, endpoint)
            }
            Provider::OpenAi => (
                get("model").unwrap_or_else(|| default_model.to_string()),
                get("base_url").unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            ),
            Provider::Ollama => (
                get("model").unwrap_or_else(|| default_model.to_string()),
                get("base_url").unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            ),
            Provider::HuggingFace => (
                get("model").unwrap_or_else(|| default_model.to_string()),
                get("base_url").unwrap_or_else(|| HUGGINGFACE_BASE_URL.to_string()),
            ),
        };

        let api_version = match provider {
            Provider::AzureOpenAi => {
                Some(get("api_version").unwrap_or_else(|| AZURE_API_VERSION.to_string()))
            }
            _ => None,
        };

        Ok(Self {
            provider,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: get("api_key"),
            api_version,
        })
    }

    fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
        })
    }

    fn require_api_key(&self) -> Result<String, NodeError> {
        self.api_key().ok_or_else(|| {
            NodeError::Configuration(format!("No API key configured for {}", self.provider.name()))
        })
    }
}

/// Handle emitted on `Embeddings` ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    #[serde(flatten)]
    pub endpoint: ModelEndpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

/// Handle emitted on `LanguageModel` ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModel {
    #[serde(flatten)]
    pub endpoint: ModelEndpoint,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.1
}

/// Conversion between handles and port values
pub trait Handle: Serialize + for<'de> Deserialize<'de> {
    const PORT_TYPE: ValueType;

    fn to_value(&self) -> Value {
        Value::Json(serde_json::to_value(self).unwrap_or_default())
    }

    fn from_value(port: &str, value: &Value) -> Result<Self, NodeError> {
        let json = value
            .as_json()
            .ok_or_else(|| NodeError::invalid_input(port, Self::PORT_TYPE, value.kind()))?;
        serde_json::from_value(json.clone()).map_err(|e| NodeError::InvalidInputType {
            field: port.to_string(),
            expected: Self::PORT_TYPE.to_string(),
            actual: format!("malformed handle ({})", e),
        })
    }
}

impl Handle for EmbeddingModel {
    const PORT_TYPE: ValueType = ValueType::Embeddings;
}

impl Handle for ChatModel {
    const PORT_TYPE: ValueType = ValueType::LanguageModel;
}

/// One chat completion request
#[derive(Debug, Clone, Default)]
pub struct ChatPrompt {
    pub system: Option<String>,
    pub user: String,
}

impl ChatPrompt {
    fn messages(&self) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": self.user }));
        messages
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Thin HTTP client for the supported provider APIs
#[derive(Clone, Default)]
pub struct ProviderClient {
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed a batch of texts, one vector per text, in order.
    pub async fn embed(
        &self,
        model: &EmbeddingModel,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, NodeError> {
        let endpoint = &model.endpoint;
        let provider = endpoint.provider.name();
        tracing::debug!(
            "Embedding {} text(s) with {} {}",
            texts.len(),
            provider,
            endpoint.model
        );

        let vectors = match endpoint.provider {
            Provider::OpenAi | Provider::AzureOpenAi => {
                let mut body = json!({ "input": texts });
                if endpoint.provider == Provider::OpenAi {
                    body["model"] = json!(endpoint.model);
                }
                if let Some(dimensions) = model.dimensions {
                    body["dimensions"] = json!(dimensions);
                }
                let request = self.openai_request(endpoint, "embeddings")?.json(&body);
                let mut response: OpenAiEmbeddingResponse = send(provider, request).await?;
                response.data.sort_by_key(|d| d.index);
                response.data.into_iter().map(|d| d.embedding).collect()
            }
            Provider::Ollama => {
                let request = self
                    .http
                    .post(format!("{}/api/embed", endpoint.base_url))
                    .json(&json!({ "model": endpoint.model, "input": texts }));
                let response: OllamaEmbedResponse = send(provider, request).await?;
                response.embeddings
            }
            Provider::HuggingFace => {
                let mut request = self
                    .http
                    .post(format!("{}/models/{}", endpoint.base_url, endpoint.model))
                    .json(&json!({ "inputs": texts }));
                if let Some(key) = endpoint.api_key() {
                    request = request.bearer_auth(key);
                }
                send::<Vec<Vec<f32>>>(provider, request).await?
            }
        };

        if vectors.len() != texts.len() {
            return Err(NodeError::provider(
                provider,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }

    /// Run one chat completion and return the assistant's text.
    pub async fn complete(&self, model: &ChatModel, prompt: &ChatPrompt) -> Result<String, NodeError> {
        let endpoint = &model.endpoint;
        let provider = endpoint.provider.name();
        tracing::debug!("Completing with {} {}", provider, endpoint.model);

        let content = match endpoint.provider {
            Provider::Ollama => {
                let mut options = json!({ "temperature": model.temperature });
                if let Some(max_tokens) = model.max_tokens {
                    options["num_predict"] = json!(max_tokens);
                }
                let request = self
                    .http
                    .post(format!("{}/api/chat", endpoint.base_url))
                    .json(&json!({
                        "model": endpoint.model,
                        "messages": prompt.messages(),
                        "stream": false,
                        "options": options,
                    }));
                let response: OllamaChatResponse = send(provider, request).await?;
                response.message.content
            }
            Provider::OpenAi | Provider::AzureOpenAi | Provider::HuggingFace => {
                let mut body = json!({
                    "messages": prompt.messages(),
                    "temperature": model.temperature,
                });
                if endpoint.provider != Provider::AzureOpenAi {
                    body["model"] = json!(endpoint.model);
                }
                if let Some(max_tokens) = model.max_tokens {
                    body["max_tokens"] = json!(max_tokens);
                }
                let request = self.openai_request(endpoint, "chat/completions")?.json(&body);
                let response: ChatCompletionResponse = send(provider, request).await?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
        };

        content.ok_or_else(|| NodeError::provider(provider, "response contained no message"))
    }

    /// POST to an OpenAI-compatible route with the right URL and auth.
    fn openai_request(
        &self,
        endpoint: &ModelEndpoint,
        route: &str,
    ) -> Result<reqwest::RequestBuilder, NodeError> {
        let request = match endpoint.provider {
            Provider::AzureOpenAi => self
                .http
                .post(format!(
                    "{}/openai/deployments/{}/{}",
                    endpoint.base_url, endpoint.model, route
                ))
                .query(&[(
                    "api-version",
                    endpoint.api_version.as_deref().unwrap_or(AZURE_API_VERSION),
                )])
                .header("api-key", endpoint.require_api_key()?),
            Provider::HuggingFace => {
                let request = self.http.post(format!(
                    "{}/models/{}/v1/{}",
                    endpoint.base_url, endpoint.model, route
                ));
                match endpoint.api_key() {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            }
            _ => self
                .http
                .post(format!("{}/{}", endpoint.base_url, route))
                .bearer_auth(endpoint.require_api_key()?),
        };
        Ok(request)
    }
}

/// Send a request and decode a JSON body, mapping every failure to a
/// provider error.
pub(crate) async fn send<T: for<'de> Deserialize<'de>>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, NodeError> {
    let response = request
        .send()
        .await
        .map_err(|e| NodeError::provider(provider, format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!("{} returned {}: {}", provider, status, body);
        return Err(NodeError::provider(
            provider,
            format!("HTTP {}: {}", status.as_u16(), body),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| NodeError::provider(provider, format!("invalid response: {}", e)))
}
