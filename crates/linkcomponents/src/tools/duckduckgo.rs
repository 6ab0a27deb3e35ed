use super::ToolSpec;
use crate::provider::{send, Handle};
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentFactory, PortDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl From<SearchResult> for Value {
    fn from(result: SearchResult) -> Self {
        Value::Object(HashMap::from([
            ("title".to_string(), Value::String(result.title)),
            ("snippet".to_string(), Value::String(result.snippet)),
            ("url".to_string(), Value::String(result.url)),
        ]))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a topic or a named group of topics
#[derive(Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn flatten_into(self, out: &mut Vec<SearchResult>) {
        match self {
            RelatedTopic::Topic { text, first_url } => {
                let title = text.split(" - ").next().unwrap_or(&text).to_string();
                out.push(SearchResult {
                    title,
                    snippet: text,
                    url: first_url,
                });
            }
            RelatedTopic::Group { topics } => {
                for topic in topics {
                    topic.flatten_into(out);
                }
            }
        }
    }
}

impl InstantAnswer {
    fn into_results(self, limit: usize) -> Vec<SearchResult> {
        let mut results = Vec::new();
        if !self.abstract_text.is_empty() {
            results.push(SearchResult {
                title: self.heading,
                snippet: self.abstract_text,
                url: self.abstract_url,
            });
        }
        for topic in self.related_topics {
            topic.flatten_into(&mut results);
        }
        results.truncate(limit);
        results
    }
}

fn tool_spec() -> ToolSpec {
    ToolSpec::single_argument(
        "duckduckgo_search",
        "Search the web with DuckDuckGo and return short answers with links",
        "tools.duckduckgo_search",
        "query",
        "Search query",
    )
}

/// DuckDuckGo instant-answer lookup. Without a query it only emits its
/// tool handle.
pub struct DuckDuckGoSearchNode {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

#[async_trait]
impl Component for DuckDuckGoSearchNode {
    fn component_type(&self) -> &str {
        "tools.duckduckgo_search"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let output = ComponentOutput::new().with_output("tool", tool_spec().to_value());
        let Some(query) = ctx.text_input("query") else {
            return Ok(output);
        };
        ctx.events.info(format!("Searching DuckDuckGo for '{}'", query));

        let request = self.client.get(format!("{}/", self.base_url)).query(&[
            ("q", query),
            ("format", "json"),
            ("no_html", "1"),
            ("skip_disambig", "1"),
        ]);
        let answer: InstantAnswer = send("duckduckgo", request).await?;
        let results = answer.into_results(self.max_results);

        tracing::debug!("DuckDuckGo returned {} result(s) for '{}'", results.len(), query);

        let text = results
            .iter()
            .map(|r| format!("{}\n{}", r.snippet, r.url))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(output
            .with_output("text", text)
            .with_output(
                "results",
                Value::Array(results.into_iter().map(Value::from).collect()),
            ))
    }
}

pub struct DuckDuckGoFactory {
    client: reqwest::Client,
    descriptor: ComponentDescriptor,
}

impl DuckDuckGoFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            descriptor: ComponentDescriptor::new("tools.duckduckgo_search", "tools")
                .display_name("DuckDuckGo Search")
                .description("Look up a query with the DuckDuckGo instant-answer API")
                .input(
                    PortDefinition::optional("query", ValueType::Text)
                        .describe("When empty only the tool handle is produced"),
                )
                .output(PortDefinition::optional("results", ValueType::List))
                .output(PortDefinition::optional("text", ValueType::Text))
                .output(PortDefinition::required("tool", ValueType::Tool)),
        }
    }
}

impl ComponentFactory for DuckDuckGoFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        let max_results = config
            .get("max_results")
            .and_then(Value::as_f64)
            .unwrap_or(5.0);
        if max_results < 1.0 {
            return Err(NodeError::Configuration(
                "max_results must be at least 1".to_string(),
            ));
        }

        Ok(Box::new(DuckDuckGoSearchNode {
            client: self.client.clone(),
            base_url: config
                .get("base_url")
                .and_then(Value::as_str)
                .unwrap_or(DUCKDUCKGO_URL)
                .trim_end_matches('/')
                .to_string(),
            max_results: max_results as usize,
        }))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}
