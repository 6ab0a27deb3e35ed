use linkcomponents::register_all;
use linkcore::{Flow, GraphError, NodeFailure, NodeSpec, Value};
use linkruntime::{ComponentRegistry, FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime() -> FlowRuntime {
    let mut registry = ComponentRegistry::new();
    register_all(&mut registry).unwrap();
    FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

#[test]
fn test_catalogue_is_registered() {
    let mut registry = ComponentRegistry::new();
    register_all(&mut registry).unwrap();

    for component in [
        "embeddings.openai",
        "embeddings.azure_openai",
        "embeddings.ollama",
        "embeddings.huggingface",
        "embeddings.model",
        "embeddings.text_embedder",
        "embeddings.similarity",
        "models.openai",
        "models.azure_openai",
        "models.ollama",
        "models.huggingface",
        "tools.calculator",
        "tools.duckduckgo_search",
        "vectorstores.local",
        "vectorstores.qdrant",
        "input.text",
        "output.text",
    ] {
        assert!(registry.contains(component), "{} is not registered", component);
    }

    let categories: Vec<_> = registry.list_by_category().into_keys().collect();
    assert_eq!(
        categories,
        vec!["embeddings", "io", "models", "tools", "vectorstores"]
    );

    // Registering twice is refused rather than silently replacing
    assert!(register_all(&mut registry).is_err());
}

#[test]
fn test_handle_ports_are_type_checked() {
    let runtime = runtime();
    let mut flow = Flow::new("wrong handle");
    let model = flow.add_node(NodeSpec::new("models.ollama"));
    let embedder = flow.add_node(NodeSpec::new("embeddings.text_embedder").with_input("text", "x"));
    flow.connect(model, "model", embedder, "embeddings");

    assert!(matches!(
        runtime.validate(&flow),
        Err(GraphError::TypeMismatch { .. })
    ));

    let mut flow = Flow::new("tool as text");
    let calculator = flow.add_node(NodeSpec::new("tools.calculator"));
    let model = flow.add_node(NodeSpec::new("models.ollama"));
    flow.connect(calculator, "tool", model, "input_value");

    assert!(matches!(
        runtime.validate(&flow),
        Err(GraphError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_calculator_flow() {
    let runtime = runtime();
    let mut flow = Flow::new("calculator");
    let input = flow.add_node(NodeSpec::new("input.text").with_name("question"));
    let calculator = flow.add_node(NodeSpec::new("tools.calculator"));
    let output = flow.add_node(NodeSpec::new("output.text"));
    flow.connect(input, "text", calculator, "expression");
    flow.connect(calculator, "result", output, "text");

    let inputs = HashMap::from([("text".to_string(), Value::from("(2 + 3) * 4"))]);
    let result = runtime.execute(&flow, inputs).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.output(output, "text"), Some(&Value::from("20")));
}

#[tokio::test]
async fn test_prompt_flow_against_ollama() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": "Bonjour" },
            "done": true
        })))
        // second run is served from the result cache
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime();
    let mut flow = Flow::new("translate");
    let prompt = flow.add_node(NodeSpec::new("input.text").with_input("text", "Say hello in French"));
    let model = flow.add_node(NodeSpec::new("models.ollama").with_config("base_url", server.uri()));
    let output = flow.add_node(NodeSpec::new("output.text"));
    flow.connect(prompt, "text", model, "input_value");
    flow.connect(model, "text_output", output, "text");

    let first = runtime.execute(&flow, HashMap::new()).await.unwrap();
    let second = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert_eq!(first.output(output, "text"), Some(&Value::from("Bonjour")));
    assert_eq!(second.output(output, "text"), Some(&Value::from("Bonjour")));
    assert!(second.cached_nodes.contains(&model));
}

#[tokio::test]
async fn test_provider_failure_skips_dependents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let runtime = runtime();
    let mut flow = Flow::new("broken model");
    let model = flow.add_node(
        NodeSpec::new("models.ollama")
            .with_config("base_url", server.uri())
            .with_input("input_value", "hi"),
    );
    let output = flow.add_node(NodeSpec::new("output.text"));
    let calculator = flow.add_node(NodeSpec::new("tools.calculator").with_input("expression", "1+1"));
    flow.connect(model, "text_output", output, "text");

    let result = runtime.execute(&flow, HashMap::new()).await.unwrap();

    assert!(matches!(result.errors[&model], NodeFailure::Execution { .. }));
    assert_eq!(result.errors[&output], NodeFailure::Propagated { origin: model });
    assert_eq!(result.output(calculator, "result"), Some(&Value::Number(2.0)));
}
