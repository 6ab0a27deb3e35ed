use linkcore::{Value, ValueType};
use serde_json::json;

#[test]
fn test_value_matches_declared_type() {
    assert!(Value::from("hello").matches(ValueType::Text));
    assert!(Value::Number(1.5).matches(ValueType::Number));
    assert!(Value::Vector(vec![0.1, 0.2]).matches(ValueType::Vector));
    assert!(Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]).matches(ValueType::Vector));
    assert!(!Value::Array(vec![Value::from("x")]).matches(ValueType::Vector));
    assert!(!Value::Number(1.0).matches(ValueType::Text));
    assert!(!Value::from("1").matches(ValueType::Number));
}

#[test]
fn test_null_and_any_accept_everything() {
    for ty in [ValueType::Text, ValueType::Vector, ValueType::LanguageModel] {
        assert!(Value::Null.matches(ty));
    }
    assert!(Value::Bytes(vec![1, 2, 3]).matches(ValueType::Any));
}

#[test]
fn test_handles_must_be_json_objects() {
    let handle = Value::Json(json!({ "provider": "openai", "model": "gpt-4o-mini" }));
    assert!(handle.matches(ValueType::LanguageModel));
    assert!(handle.matches(ValueType::Embeddings));
    assert!(!Value::Json(json!("gpt-4o-mini")).matches(ValueType::LanguageModel));
    assert!(!Value::from("openai").matches(ValueType::Embeddings));
}

#[test]
fn test_data_accepts_text_and_records() {
    assert!(Value::from("a document").matches(ValueType::Data));
    assert!(Value::Json(json!({ "id": 1 })).matches(ValueType::Data));
    assert!(!Value::Number(3.0).matches(ValueType::Data));
}

#[test]
fn test_port_type_compatibility() {
    assert!(ValueType::Text.compatible_with(ValueType::Text));
    assert!(ValueType::Text.compatible_with(ValueType::Data));
    assert!(!ValueType::Data.compatible_with(ValueType::Text));
    assert!(ValueType::Any.compatible_with(ValueType::Vector));
    assert!(ValueType::Embeddings.compatible_with(ValueType::Any));
    assert!(!ValueType::Embeddings.compatible_with(ValueType::LanguageModel));
    assert!(!ValueType::Number.compatible_with(ValueType::Text));
}

#[test]
fn test_plain_json_conversion() {
    let value = Value::from_plain_json(json!({
        "query": "rust",
        "k": 3,
        "filters": [true, null]
    }));

    match &value {
        Value::Object(map) => {
            assert_eq!(map["query"], Value::from("rust"));
            assert_eq!(map["k"], Value::Number(3.0));
            assert_eq!(
                map["filters"],
                Value::Array(vec![Value::Bool(true), Value::Null])
            );
        }
        other => panic!("Expected object, got {:?}", other),
    }

    assert_eq!(value.into_json(), json!({ "query": "rust", "k": 3.0, "filters": [true, null] }));
}

#[test]
fn test_value_serde_format() {
    let encoded = serde_json::to_value(Value::Number(2.0)).unwrap();
    assert_eq!(encoded, json!({ "type": "Number", "value": 2.0 }));

    let decoded: Value = serde_json::from_value(json!({ "type": "Null" })).unwrap();
    assert!(decoded.is_null());
    assert_eq!(ValueType::LanguageModel.to_string(), "language_model");
}
