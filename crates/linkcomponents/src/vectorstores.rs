//! Vector store components.
//!
//! Both stores take an embedding model handle, optional `ingest_data` to
//! add and an optional `search_query` to look up, and do whichever of the
//! two they are given (ingest first).

mod local;
mod qdrant;

pub use local::{LocalCollections, LocalVectorStoreFactory, LocalVectorStoreNode};
pub use qdrant::{QdrantFactory, QdrantNode};

use linkcore::{ComponentContext, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, PortDefinition};
use std::collections::HashMap;

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText {
    pub text: String,
    pub score: f64,
}

impl From<ScoredText> for Value {
    fn from(hit: ScoredText) -> Self {
        Value::Object(HashMap::from([
            ("text".to_string(), Value::String(hit.text)),
            ("score".to_string(), Value::Number(hit.score)),
        ]))
    }
}

fn descriptor(component_type: &str, display_name: &str, description: &str) -> ComponentDescriptor {
    ComponentDescriptor::new(component_type, "vectorstores")
        .display_name(display_name)
        .description(description)
        .input(PortDefinition::required("embeddings", ValueType::Embeddings))
        .input(
            PortDefinition::optional("ingest_data", ValueType::Any)
                .describe("Text, list of texts or records with a 'text' field"),
        )
        .input(PortDefinition::optional("search_query", ValueType::Text))
        .output(PortDefinition::optional("search_results", ValueType::List))
        .output(PortDefinition::optional("text", ValueType::Text))
        .output(PortDefinition::optional("ingested", ValueType::Number))
}

/// Texts to ingest from whatever shape arrived on `ingest_data`.
fn ingest_texts(ctx: &ComponentContext) -> Result<Vec<String>, NodeError> {
    let Some(value) = ctx.inputs.get("ingest_data") else {
        return Ok(Vec::new());
    };

    let mut texts = Vec::new();
    collect_texts(value, &mut texts)?;
    texts.retain(|t| !t.trim().is_empty());
    Ok(texts)
}

fn collect_texts(value: &Value, out: &mut Vec<String>) -> Result<(), NodeError> {
    match value {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_texts(item, out)?;
            }
        }
        Value::Object(map) => match map.get("text") {
            Some(text) => collect_texts(text, out)?,
            None => {
                return Err(NodeError::invalid_input(
                    "ingest_data",
                    ValueType::Data,
                    "object without 'text'",
                ))
            }
        },
        Value::Json(json) => collect_texts(&Value::from_plain_json(json.clone()), out)?,
        other => {
            return Err(NodeError::invalid_input(
                "ingest_data",
                ValueType::Data,
                other.kind(),
            ))
        }
    }
    Ok(())
}

fn number_of_results(config: &HashMap<String, Value>) -> usize {
    config
        .get("number_of_results")
        .and_then(Value::as_f64)
        .map(|n| n.max(1.0) as usize)
        .unwrap_or(4)
}

fn results_text(hits: &[ScoredText]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
