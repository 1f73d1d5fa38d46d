//! Non-RPC HTTP surface: health, discovery, chat convenience wrappers, and
//! the schema endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::a2a::{WireMessage, WirePart};
use crate::scope::ExecutionScope;

use super::AppState;
use super::problem::{Problem, from_db_error};
use super::sse::bridge_stream;

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ─── Agent card ───────────────────────────────────────────────────────────────

pub async fn agent_card(
    State(state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
    Extension(auth_scope): Extension<ExecutionScope>,
) -> Response {
    let scope = ExecutionScope {
        graph_id,
        ..auth_scope
    };
    match state.registry.agent_card(&scope, &state.base_url) {
        Ok(Some(card)) => Json(card).into_response(),
        Ok(None) => Problem::not_found().into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}

// ─── Chat wrappers ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: String,
    pub task_id: String,
}

fn chat_wire_message(text: &str, conversation_id: Option<&str>) -> WireMessage {
    WireMessage {
        role: "user".to_string(),
        parts: vec![WirePart::Text {
            text: text.to_string(),
        }],
        message_id: crate::short_id(),
        context_id: conversation_id.map(str::to_string),
        task_id: None,
        kind: "message".to_string(),
        metadata: None,
    }
}

/// Blocking chat for simple clients; wraps `message/send`.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<ExecutionScope>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return super::problem::validation_failure("/message", "must not be empty").into_response();
    }

    let inbound = chat_wire_message(&request.message, request.conversation_id.as_deref());
    match state.executor.execute(&scope, &inbound).await {
        Ok(outcome) => {
            let reply = outcome
                .reply
                .as_ref()
                .map(|m| m.text())
                .unwrap_or_else(|| "Conversation transferred.".to_string());
            Json(ChatResponse {
                reply,
                conversation_id: outcome.context_id,
                task_id: outcome.task.id,
            })
            .into_response()
        }
        Err(crate::executor::ExecutorError::AgentNotFound) => Problem::not_found().into_response(),
        Err(e) => {
            let correlation_id = crate::short_id();
            tracing::error!(correlation = %correlation_id, error = %e, "chat turn failed");
            Problem::internal(&correlation_id).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamQuery {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// SSE convenience wrapper over `message/stream`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<ExecutionScope>,
    Query(query): Query<ChatStreamQuery>,
) -> Response {
    if !state.config.server.streaming_enabled {
        return Problem::unprocessable("streaming is disabled").into_response();
    }

    let inbound = chat_wire_message(&query.message, query.conversation_id.as_deref());
    let task_id = crate::short_id();
    let control = state.executor.control().clone();
    let events = control.register(&task_id).subscribe();

    let executor = state.executor.clone();
    let ids = crate::executor::TurnIds {
        task_id: Some(task_id.clone()),
        context_id: None,
    };
    tokio::spawn(async move {
        if let Err(e) = executor.execute_with_ids(&scope, &inbound, ids).await {
            tracing::debug!(error = %e, "chat stream turn ended with error");
        }
    });

    bridge_stream(Value::Null, None, events, control, task_id).into_response()
}

// ─── Schema endpoints ─────────────────────────────────────────────────────────

pub async fn openapi() -> Json<Value> {
    Json(json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Switchyard",
            "description": "Multi-agent orchestration runtime speaking the A2A protocol.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/agents/{graphId}/a2a": {
                "post": {
                    "summary": "A2A JSON-RPC endpoint",
                    "description": "Methods: message/send, message/stream, tasks/get, tasks/cancel, tasks/resubscribe.",
                }
            },
            "/agents/{graphId}/.well-known/agent.json": {
                "get": {"summary": "Agent discovery card"}
            },
            "/v1/chat": {
                "post": {"summary": "Blocking chat convenience wrapper"}
            },
            "/api/chat/stream": {
                "get": {"summary": "SSE chat convenience wrapper"}
            },
            "/project-full/{projectId}": {
                "put": {"summary": "Upsert a project with its graphs, agents, relations, and tools"}
            },
            "/api-keys": {
                "post": {"summary": "Create an API key (raw key returned once)"},
                "get": {"summary": "List API keys"}
            },
            "/api-keys/{id}": {
                "get": {"summary": "Get an API key (prefix only)"},
                "delete": {"summary": "Delete an API key"}
            },
            "/credentials": {
                "post": {"summary": "Create a credential reference"}
            },
            "/credentials/{id}": {
                "delete": {"summary": "Delete a credential reference (best-effort external delete first)"}
            },
            "/health": {
                "get": {"summary": "Liveness probe", "responses": {"204": {"description": "healthy"}}}
            }
        }
    }))
}

pub async fn docs() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
  <head><title>Switchyard API</title></head>
  <body>
    <h1>Switchyard API</h1>
    <p>The machine-readable schema lives at <a href="/openapi.json">/openapi.json</a>.</p>
  </body>
</html>
"#,
    )
}
