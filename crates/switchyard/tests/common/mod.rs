//! Shared harness for gateway integration tests: an in-memory ledger, the
//! scripted model provider, and bypass-secret auth.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use switchyard::config::{Environment, RuntimeConfig};
use switchyard::gateway::{AppState, router};
use switchyard::llm::{CompletionResponse, ModelProvider, ScriptedProvider};

pub const BYPASS: &str = "integration-bypass-secret";

pub fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.environment = Environment::Production;
    config.auth.bypass_secret = Some(BYPASS.to_string());
    config
}

pub fn test_app(responses: Vec<CompletionResponse>) -> (Router, Arc<AppState>) {
    test_app_with_config(test_config(), responses)
}

pub fn test_app_with_config(
    config: RuntimeConfig,
    responses: Vec<CompletionResponse>,
) -> (Router, Arc<AppState>) {
    let pool = switchyard::database::init_in_memory().unwrap();
    let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(responses));
    let state = AppState::new(config, pool, provider);
    (router(state.clone()), state)
}

/// Issue a request authenticated via the bypass secret for the given tenant.
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    tenant: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {BYPASS}"))
        .header("x-inkeep-tenant-id", tenant)
        .header("x-inkeep-project-id", "proj")
        .header("x-inkeep-graph-id", "graph");
    if body.is_some() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    let request = builder
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

/// Issue an unauthenticated request.
pub async fn request_anon(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    let request = builder
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// The standard two-agent graph used across scenarios: `a_router` can
/// transfer to `a_support` and delegate to `a_child`.
pub async fn seed_support_graph(app: &Router, tenant: &str) {
    let body = serde_json::json!({
        "name": "Support project",
        "graphs": [{
            "id": "graph",
            "name": "Support graph",
            "defaultAgentId": "a_router",
            "agents": [
                {"id": "a_router", "name": "Router", "description": "Routes requests", "prompt": "You route."},
                {"id": "a_support", "name": "Support", "description": "Handles billing", "prompt": "You support."},
                {"id": "a_child", "name": "Researcher", "description": "Researches", "prompt": "You research."}
            ],
            "relations": [
                {"sourceAgentId": "a_router", "targetAgentId": "a_support", "relationType": "transfer"},
                {"sourceAgentId": "a_router", "targetAgentId": "a_child", "relationType": "delegate"}
            ]
        }]
    });
    let (status, _) = request(app, "PUT", "/project-full/proj", tenant, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
}

/// JSON-RPC call against the graph endpoint.
pub async fn rpc(
    app: &Router,
    tenant: &str,
    id: Value,
    method: &str,
    params: Value,
) -> (StatusCode, Value) {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    request(app, "POST", "/agents/graph/a2a", tenant, Some(body)).await
}

/// Parse SSE body text into the JSON payloads of its `data:` frames.
pub fn parse_sse_frames(raw: &str) -> Vec<Value> {
    raw.split("\n\n")
        .filter_map(|chunk| {
            let data = chunk
                .lines()
                .filter_map(|line| line.strip_prefix("data: "))
                .collect::<Vec<_>>()
                .join("");
            if data.is_empty() || data == "keep-alive" {
                return None;
            }
            serde_json::from_str(&data).ok()
        })
        .collect()
}
