//! Tool components: deterministic helpers and web lookups an agent can call.
//!
//! Every tool also emits a [`ToolSpec`] handle on its `tool` port, so the
//! same node can be wired as a callable tool instead of being run inline.

mod calculator;
mod duckduckgo;

use crate::provider::Handle;
use linkcore::ValueType;
use serde::{Deserialize, Serialize};

pub use calculator::{evaluate, CalculatorFactory, CalculatorNode};
pub use duckduckgo::{DuckDuckGoFactory, DuckDuckGoSearchNode, SearchResult};

/// Callable description of a tool: what it is called, what it does and the
/// JSON schema of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Component type that runs the call
    pub component: String,
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    /// Tool taking a single required string argument
    pub(crate) fn single_argument(
        name: &str,
        description: &str,
        component: &str,
        argument: &str,
        argument_description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            component: component.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    argument: { "type": "string", "description": argument_description }
                },
                "required": [argument],
            }),
        }
    }
}

impl Handle for ToolSpec {
    const PORT_TYPE: ValueType = ValueType::Tool;
}
