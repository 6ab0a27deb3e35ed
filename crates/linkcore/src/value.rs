use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dynamic value type for component inputs/outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Vector(Vec<f32>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Vector(_) => "vector",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Closest port type for this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null | Value::Bytes(_) => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::Text,
            Value::Json(_) => ValueType::Json,
            Value::Vector(_) => ValueType::Vector,
            Value::Array(_) => ValueType::List,
            Value::Object(_) => ValueType::Data,
        }
    }

    /// Whether this value may travel on a port declared as `ty`.
    ///
    /// `Null` is accepted everywhere so optional outputs can be left empty.
    pub fn matches(&self, ty: ValueType) -> bool {
        match (ty, self) {
            (ValueType::Any, _) | (_, Value::Null) => true,
            (ValueType::Text, Value::String(_)) => true,
            (ValueType::Number, Value::Number(_)) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Json, Value::Json(_)) => true,
            (ValueType::Vector, Value::Vector(_)) => true,
            (ValueType::Vector, Value::Array(items)) => items.iter().all(|v| v.as_f64().is_some()),
            (ValueType::List, Value::Array(_)) => true,
            (ValueType::Data, Value::Object(_) | Value::Json(_) | Value::String(_)) => true,
            (
                ValueType::Embeddings | ValueType::LanguageModel | ValueType::Tool,
                Value::Json(serde_json::Value::Object(_)),
            ) => true,
            _ => false,
        }
    }

    /// Convert into plain JSON, dropping the variant tags.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::json!(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::json!(b),
            Value::Json(j) => j,
            Value::Vector(v) => serde_json::json!(v),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }

    /// Convert plain JSON into a value, mapping scalars onto native variants.
    pub fn from_plain_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_plain_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_plain_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

/// Declared type of a component port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Text,
    Number,
    Bool,
    Json,
    Vector,
    List,
    Data,
    Embeddings,
    LanguageModel,
    Tool,
}

impl ValueType {
    /// Whether an output of type `self` may feed an input of type `input`.
    pub fn compatible_with(self, input: ValueType) -> bool {
        self == input
            || self == ValueType::Any
            || input == ValueType::Any
            || (self == ValueType::Text && input == ValueType::Data)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Text => "text",
            ValueType::Number => "number",
            ValueType::Bool => "bool",
            ValueType::Json => "json",
            ValueType::Vector => "vector",
            ValueType::List => "list",
            ValueType::Data => "data",
            ValueType::Embeddings => "embeddings",
            ValueType::LanguageModel => "language_model",
            ValueType::Tool => "tool",
        };
        f.write_str(name)
    }
}
