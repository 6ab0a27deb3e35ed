use actix_cors::Cors;
use actix_web::{
    delete, get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use clap::Parser;
use linkcore::{Flow, FlowError, FlowId, Value};
use linkruntime::{ComponentRegistry, ExecutionResult, FlowRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server configuration, from flags or environment
#[derive(Parser, Debug)]
#[command(name = "linkflow-server")]
#[command(about = "HTTP API for running LLM component flows", long_about = None)]
struct ServerConfig {
    /// Address the HTTP server listens on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    bind_address: String,

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

impl ServerConfig {
    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_parallel_nodes: self.max_parallel,
            event_buffer_size: self.event_buffer,
            cache_capacity: self.cache_capacity,
            cache_ttl_secs: self.cache_ttl_secs,
        }
    }
}

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for a flow run
#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    inputs: HashMap<String, serde_json::Value>,
}

/// Response for flow creation
#[derive(Debug, Serialize)]
struct FlowResponse {
    id: FlowId,
    message: String,
}

/// Response for a flow run
#[derive(Debug, Serialize)]
struct RunResponse {
    execution_id: uuid::Uuid,
    success: bool,
    completed_nodes: usize,
    total_nodes: usize,
    cached_nodes: usize,
    duration_ms: u64,
    outputs: HashMap<String, HashMap<String, serde_json::Value>>,
    errors: HashMap<String, String>,
}

impl RunResponse {
    fn new(flow: &Flow, result: ExecutionResult) -> Self {
        Self {
            execution_id: result.execution_id,
            success: result.is_success(),
            completed_nodes: result.completed_nodes(),
            total_nodes: result.total_nodes,
            cached_nodes: result.cached_nodes.len(),
            duration_ms: result.duration_ms,
            errors: result
                .errors
                .iter()
                .map(|(id, failure)| (flow.node_label(*id), failure.to_string()))
                .collect(),
            outputs: result
                .outputs
                .into_iter()
                .map(|(id, ports)| {
                    let ports = ports.into_iter().map(|(k, v)| (k, v.into_json())).collect();
                    (flow.node_label(id), ports)
                })
                .collect(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "linkflow"
    }))
}

/// Component catalogue grouped by category
#[get("/api/components")]
async fn list_components(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let catalogue = data.runtime.registry().list_by_category();
    Ok(HttpResponse::Ok().json(catalogue))
}

/// List all stored flows
#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let flows: Vec<_> = data
        .runtime
        .list_flows()
        .await
        .iter()
        .map(|f| {
            serde_json::json!({
                "id": f.id,
                "name": f.name,
                "description": f.description,
                "nodes": f.nodes.len(),
                "edges": f.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(flows))
}

/// Validate and store a new flow
#[post("/api/flows")]
async fn create_flow(
    data: web::Data<AppState>,
    flow: web::Json<Flow>,
) -> ActixResult<impl Responder> {
    let flow = flow.into_inner();
    let name = flow.name.clone();

    match data.runtime.register_flow(flow).await {
        Ok(flow_id) => {
            info!("Stored flow: {} ({})", name, flow_id);
            Ok(HttpResponse::Created().json(FlowResponse {
                id: flow_id,
                message: "Flow created successfully".to_string(),
            }))
        }
        Err(e) => {
            warn!("Rejected flow {}: {}", name, e);
            Ok(HttpResponse::UnprocessableEntity().json(ErrorResponse::new(e)))
        }
    }
}

/// Validate a flow without storing it
#[post("/api/flows/validate")]
async fn validate_flow(
    data: web::Data<AppState>,
    flow: web::Json<Flow>,
) -> ActixResult<impl Responder> {
    let flow = flow.into_inner();

    match data.runtime.validate(&flow) {
        Ok(graph) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "valid": true,
            "order": graph.order(),
            "sources": graph.sources(),
            "terminals": graph.terminals(),
        }))),
        Err(e) => Ok(HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "valid": false,
            "error": e.to_string(),
        }))),
    }
}

/// Get a specific flow
#[get("/api/flows/{id}")]
async fn get_flow(
    data: web::Data<AppState>,
    path: web::Path<FlowId>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();

    match data.runtime.get_flow(flow_id).await {
        Some(flow) => Ok(HttpResponse::Ok().json(flow)),
        None => Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("Flow {} not found", flow_id)))),
    }
}

/// Delete a flow
#[delete("/api/flows/{id}")]
async fn delete_flow(
    data: web::Data<AppState>,
    path: web::Path<FlowId>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();

    match data.runtime.remove_flow(flow_id).await {
        Some(_) => {
            info!("Deleted flow: {}", flow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Flow deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("Flow {} not found", flow_id)))),
    }
}

/// Run a stored flow
#[post("/api/flows/{id}/run")]
async fn run_flow(
    data: web::Data<AppState>,
    path: web::Path<FlowId>,
    req: Option<web::Json<RunRequest>>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    let inputs: HashMap<String, Value> = req
        .map(|r| r.into_inner())
        .unwrap_or_default()
        .inputs
        .into_iter()
        .map(|(k, v)| (k, Value::from_plain_json(v)))
        .collect();

    let Some(flow) = data.runtime.get_flow(flow_id).await else {
        return Ok(HttpResponse::NotFound()
            .json(ErrorResponse::new(format!("Flow {} not found", flow_id))));
    };

    info!("Running flow: {} ({})", flow.name, flow_id);

    match data.runtime.execute(&flow, inputs).await {
        Ok(result) => {
            info!(
                "Flow {} finished: {}/{} nodes",
                flow_id,
                result.completed_nodes(),
                result.total_nodes
            );
            Ok(HttpResponse::Ok().json(RunResponse::new(&flow, result)))
        }
        Err(FlowError::Graph(e)) => {
            Ok(HttpResponse::UnprocessableEntity().json(ErrorResponse::new(e)))
        }
        Err(e) => {
            error!("Flow {} run failed: {}", flow_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e)))
        }
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging, dropped {} event(s)", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting linkflow server");

    let mut registry = ComponentRegistry::new();
    linkcomponents::register_all(&mut registry)?;

    let runtime = Arc::new(FlowRuntime::with_registry(
        Arc::new(registry),
        config.runtime_config(),
    ));

    info!("✅ Runtime initialized with the component catalogue");

    let app_state = web::Data::new(AppState {
        runtime: runtime.clone(),
    });

    info!("🌐 Server starting on http://{}", config.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_components)
            .service(list_flows)
            .service(create_flow)
            .service(validate_flow)
            .service(get_flow)
            .service(delete_flow)
            .service(run_flow)
            .service(websocket_events)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    runtime.shutdown();
    Ok(())
}
