use linkcomponents::tools::evaluate;
use linkcomponents::{CalculatorFactory, DuckDuckGoFactory, Handle, ToolSpec};
use linkcore::{Component, ComponentContext, EventEmitter, NodeError, Value};
use linkruntime::ComponentFactory;
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_context(inputs: &[(&str, &str)]) -> ComponentContext {
    let node_id = uuid::Uuid::new_v4();
    let mut ctx = ComponentContext::new(node_id, EventEmitter::detached(node_id));
    for (port, value) in inputs {
        ctx.inputs.insert(port.to_string(), Value::from(*value));
    }
    ctx
}

#[test]
fn test_calculator_precedence() {
    assert_eq!(evaluate("1 + 2 * 3"), Ok(7.0));
    assert_eq!(evaluate("(1 + 2) * 3"), Ok(9.0));
    assert_eq!(evaluate("2 ^ 3 ^ 2"), Ok(512.0));
    assert_eq!(evaluate("-2 ^ 2"), Ok(-4.0));
    assert_eq!(evaluate("2 ^ -1"), Ok(0.5));
    assert_eq!(evaluate("10 % 4 - -1"), Ok(3.0));
    assert_eq!(evaluate("  7.5 / 2.5 "), Ok(3.0));
}

#[test]
fn test_calculator_rejects_bad_input() {
    assert!(evaluate("").is_err());
    assert!(evaluate("1 +").is_err());
    assert!(evaluate("(1 + 2").is_err());
    assert!(evaluate("1 2").is_err());
    assert!(evaluate("2 * x").is_err());
    assert_eq!(evaluate("1 / 0"), Err("division by zero".to_string()));
    assert!(evaluate("1.2.3").is_err());
}

#[test]
fn test_calculator_limits_nesting() {
    let signs = format!("{}1", "-".repeat(1_000_000));
    assert_eq!(evaluate(&signs), Err("expression nested too deeply".to_string()));

    let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
    assert_eq!(evaluate(&parens), Err("expression nested too deeply".to_string()));

    let exponents = format!("{}2", "2^".repeat(100_000));
    assert!(evaluate(&exponents).is_err());

    // moderate nesting is still fine
    let nested = format!("{}1{}", "(".repeat(50), ")".repeat(50));
    assert_eq!(evaluate(&nested), Ok(1.0));
    assert_eq!(evaluate("--------2"), Ok(2.0));
}

#[tokio::test]
async fn test_tools_emit_tool_handles() {
    let calculator = CalculatorFactory::new().create(&HashMap::new()).unwrap();
    let output = calculator
        .execute(create_test_context(&[]))
        .await
        .unwrap();

    assert!(!output.outputs.contains_key("result"));
    let tool = ToolSpec::from_value("tool", &output.outputs["tool"]).unwrap();
    assert_eq!(tool.name, "calculator");
    assert_eq!(tool.component, "tools.calculator");
    assert_eq!(tool.input_schema["required"], json!(["expression"]));

    let output = calculator
        .execute(create_test_context(&[("expression", "1 + 1")]))
        .await
        .unwrap();
    assert_eq!(output.outputs["result"], Value::Number(2.0));
    assert!(output.outputs.contains_key("tool"));

    // no query means no HTTP call at all
    let search = DuckDuckGoFactory::new(reqwest::Client::new())
        .create(&HashMap::from([(
            "base_url".to_string(),
            Value::from("http://127.0.0.1:9"),
        )]))
        .unwrap();
    let output = search.execute(create_test_context(&[])).await.unwrap();
    let tool = ToolSpec::from_value("tool", &output.outputs["tool"]).unwrap();
    assert_eq!(tool.name, "duckduckgo_search");
    assert!(tool.input_schema["properties"]["query"].is_object());
    assert!(!output.outputs.contains_key("results"));
}

#[tokio::test]
async fn test_calculator_component() {
    let calculator = CalculatorFactory::new().create(&HashMap::new()).unwrap();

    let output = calculator
        .execute(create_test_context(&[("expression", "4 * (2 + 3)")]))
        .await
        .unwrap();
    assert_eq!(output.outputs["result"], Value::Number(20.0));
    assert_eq!(output.outputs["text"], Value::from("20"));

    let error = calculator
        .execute(create_test_context(&[("expression", "4 /")]))
        .await
        .unwrap_err();
    assert!(matches!(error, NodeError::ExecutionFailed(_)));
}

#[tokio::test]
async fn test_duckduckgo_search() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("q", "rust language"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Heading": "Rust (programming language)",
            "AbstractText": "Rust is a general-purpose programming language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
            "RelatedTopics": [
                { "Text": "Cargo - Rust package manager", "FirstURL": "https://duckduckgo.com/Cargo" },
                {
                    "Name": "See also",
                    "Topics": [
                        { "Text": "Ferris - Rust mascot", "FirstURL": "https://duckduckgo.com/Ferris" },
                        { "Text": "Crates.io - registry", "FirstURL": "https://duckduckgo.com/Crates" }
                    ]
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = HashMap::new();
    config.insert("base_url".to_string(), Value::from(server.uri()));
    config.insert("max_results".to_string(), Value::Number(3.0));
    let search = DuckDuckGoFactory::new(reqwest::Client::new())
        .create(&config)
        .unwrap();

    let output = search
        .execute(create_test_context(&[("query", "rust language")]))
        .await
        .unwrap();

    let results = output.outputs["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    match &results[0] {
        Value::Object(first) => {
            assert_eq!(first["title"], Value::from("Rust (programming language)"));
        }
        other => panic!("Expected object, got {:?}", other),
    }
    match &results[2] {
        Value::Object(nested) => assert_eq!(nested["title"], Value::from("Ferris")),
        other => panic!("Expected object, got {:?}", other),
    }
    assert!(output.outputs["text"]
        .as_str()
        .unwrap()
        .contains("general-purpose"));
}

#[tokio::test]
async fn test_duckduckgo_outage_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = HashMap::new();
    config.insert("base_url".to_string(), Value::from(server.uri()));
    let search = DuckDuckGoFactory::new(reqwest::Client::new())
        .create(&config)
        .unwrap();

    let result = search
        .execute(create_test_context(&[("query", "anything")]))
        .await;
    assert!(matches!(result, Err(NodeError::Provider { .. })));
}
