// crates/linkcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linkcore::{ExecutionEvent, Flow, NodeEvent, NodeId, NodeSpec, Value};
use linkruntime::{ComponentRegistry, FlowRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linkflow")]
#[command(about = "Run and inspect LLM component flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run inputs as a JSON object (`port` or `node_name.port` keys)
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Validate a flow file against the component catalogue
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available components
    Components {
        /// Only show one category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RuntimeArgs {
    /// Maximum nodes running at once
    #[arg(long, env = "LINKFLOW_MAX_PARALLEL", default_value_t = 10)]
    max_parallel: usize,

    /// Maximum number of cached node results
    #[arg(long, env = "LINKFLOW_CACHE_CAPACITY", default_value_t = 1024)]
    cache_capacity: u64,

    /// Seconds a cached result stays valid
    #[arg(long, env = "LINKFLOW_CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    /// Capacity of the execution event channel
    #[arg(long, env = "LINKFLOW_EVENT_BUFFER", default_value_t = 1000)]
    event_buffer: usize,
}

impl From<RuntimeArgs> for RuntimeConfig {
    fn from(args: RuntimeArgs) -> Self {
        RuntimeConfig {
            max_parallel_nodes: args.max_parallel,
            event_buffer_size: args.event_buffer,
            cache_capacity: args.cache_capacity,
            cache_ttl_secs: args.cache_ttl_secs,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> Result<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    linkcomponents::register_all(&mut registry)?;
    Ok(registry)
}

fn load_flow(file: &Path) -> Result<Flow> {
    let flow_json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&flow_json).with_context(|| format!("Invalid flow in {}", file.display()))
}

/// Parse `--input` into run inputs, converting plain JSON to values
fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input_str) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str(&input_str)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from_plain_json(v)))
            .collect()),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
            runtime,
        } => {
            init_tracing(verbose);
            run_flow(file, input, runtime.into()).await?;
        }

        Commands::Validate { file } => {
            init_tracing(false);
            validate_flow(file)?;
        }

        Commands::Components { category } => {
            list_components(category.as_deref())?;
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

async fn run_flow(file: PathBuf, input: Option<String>, config: RuntimeConfig) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let flow = load_flow(&file)?;

    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let inputs = parse_inputs(input)?;
    let runtime = FlowRuntime::with_registry(Arc::new(registry()?), config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let labels: HashMap<_, _> = flow
        .nodes
        .iter()
        .map(|node| (node.id, flow.node_label(node.id)))
        .collect();

    let event_task = tokio::spawn(async move {
        let label = |id: NodeId| labels.get(&id).cloned().unwrap_or_else(|| id.to_string());
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::FlowStarted { .. } => {
                    println!("▶️  Flow started");
                }
                ExecutionEvent::NodeStarted {
                    node_id, component, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", label(node_id), component);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    cached,
                    ..
                } => {
                    if cached {
                        println!("  💾 Node {} served from cache", label(node_id));
                    } else {
                        println!("  ✅ Node {} completed in {}ms", label(node_id), duration_ms);
                    }
                }
                ExecutionEvent::NodeRetrying {
                    node_id,
                    attempt,
                    error,
                    ..
                } => {
                    println!("  🔁 Node {} retrying (attempt {}): {}", label(node_id), attempt, error);
                }
                ExecutionEvent::NodeFailed {
                    node_id, failure, ..
                } => {
                    println!("  ❌ Node {} failed: {}", label(node_id), failure);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", label(node_id), message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", label(node_id), message);
                    }
                    NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", label(node_id), percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", label(node_id), percent);
                        }
                    }
                    NodeEvent::Data { .. } => {}
                },
                ExecutionEvent::FlowCompleted {
                    success,
                    failed_nodes,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Flow completed successfully in {}ms", duration_ms);
                    } else {
                        println!(
                            "💥 Flow finished with {} failed node(s) after {}ms",
                            failed_nodes, duration_ms
                        );
                    }
                }
            }
        }
    });

    let result = runtime.execute(&flow, inputs).await?;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!(
        "   Completed: {}/{} nodes ({} cached)",
        result.completed_nodes(),
        result.total_nodes,
        result.cached_nodes.len()
    );

    let terminal_outputs = result.terminal_outputs();
    if !terminal_outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, outputs) in terminal_outputs {
            println!("   {}:", flow.node_label(node_id));
            for (port, value) in outputs {
                println!("     {}: {}", port, serde_json::to_string(&value.clone().into_json())?);
            }
        }
    }

    if !result.errors.is_empty() {
        println!();
        println!("🧯 Failures:");
        for (node_id, failure) in &result.errors {
            println!("   {}: {}", flow.node_label(*node_id), failure);
        }
        anyhow::bail!("{} node(s) did not complete", result.errors.len());
    }

    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(&file)?;
    let runtime = FlowRuntime::with_registry(Arc::new(registry()?), RuntimeConfig::default());

    match runtime.validate(&flow) {
        Ok(graph) => {
            println!("✅ Flow is valid:");
            println!("   Name: {}", flow.name);
            println!("   Nodes: {}", graph.node_count());
            println!("   Edges: {}", flow.edges.len());
            let order: Vec<String> = graph.order().iter().map(|id| flow.node_label(*id)).collect();
            println!("   Order: {}", order.join(" → "));
            Ok(())
        }
        Err(e) => {
            println!("❌ Flow is invalid: {}", e);
            Err(e.into())
        }
    }
}

fn list_components(category: Option<&str>) -> Result<()> {
    println!("📦 Available Components:");

    let registry = registry()?;
    for (name, descriptors) in registry.list_by_category() {
        if category.is_some_and(|c| c != name) {
            continue;
        }
        println!();
        println!("  [{}]", name);
        for descriptor in descriptors {
            let cached = if descriptor.cacheable { " 💾" } else { "" };
            println!("  • {} ({}){}", descriptor.component_type, descriptor.display_name, cached);
            println!("    {}", descriptor.description);
            for port in &descriptor.inputs {
                let required = if port.required { "" } else { "?" };
                println!("      ← {}{}: {}", port.name, required, port.value_type);
            }
            for port in &descriptor.outputs {
                println!("      → {}: {}", port.name, port.value_type);
            }
        }
    }

    Ok(())
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example Prompt Flow");
    flow.description = Some("Sends a question to a local Ollama model and prints the answer".to_string());

    let question = NodeSpec::new("input.text")
        .with_name("question")
        .with_input("text", "What is a dataflow graph?")
        .with_position(100.0, 100.0);

    let model = NodeSpec::new("models.ollama")
        .with_name("llm")
        .with_config("model", "llama3.2")
        .with_config("system_message", "Answer in one paragraph.")
        .with_position(300.0, 100.0)
        .with_retry(3, 500);

    let answer = NodeSpec::new("output.text")
        .with_name("answer")
        .with_position(500.0, 100.0);

    let question_id = flow.add_node(question);
    let model_id = flow.add_node(model);
    let answer_id = flow.add_node(answer);

    flow.connect(question_id, "text", model_id, "input_value");
    flow.connect(model_id, "text_output", answer_id, "text");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  linkflow run --file {} --input '{{\"question.text\": \"Why is the sky blue?\"}}'",
        output.display()
    );

    Ok(())
}
