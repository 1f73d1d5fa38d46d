//! A2A JSON-RPC dispatcher.
//!
//! `POST /agents/{graphId}/a2a` carries every protocol method. The JSON-RPC
//! `id` is echoed verbatim in all responses, including errors; envelope
//! violations use the protocol error codes over HTTP 200.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;

use crate::a2a::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageSendParams, SendResult, TaskIdParams,
    WireTask, effective_context_id, error_codes,
};
use crate::database::models::{Artifact, Task};
use crate::executor::{ExecutorError, TurnIds};
use crate::scope::ExecutionScope;

use super::AppState;
use super::sse::{bridge_stream, snapshot_stream};

pub async fn a2a_handler(
    State(state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
    Extension(auth_scope): Extension<ExecutionScope>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // The path names the graph; tenant and project come from auth.
    let scope = ExecutionScope {
        graph_id,
        ..auth_scope
    };

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            let error = JsonRpcError::new(error_codes::PARSE, "Parse error")
                .with_data(Value::String(e.to_string()));
            return Json(JsonRpcResponse::err(Value::Null, error)).into_response();
        }
    };

    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(_) => {
            return Json(JsonRpcResponse::err(
                Value::Null,
                JsonRpcError::invalid_request(),
            ))
            .into_response();
        }
    };

    let id = request.id.clone();
    if !request.is_valid_envelope() {
        return Json(JsonRpcResponse::err(id, JsonRpcError::invalid_request())).into_response();
    }

    match request.method.as_str() {
        "message/send" => message_send(state, scope, id, request.params).await,
        "message/stream" => message_stream(state, scope, id, request.params, &headers).await,
        "tasks/get" => tasks_get(state, scope, id, request.params).await,
        "tasks/cancel" => tasks_cancel(state, scope, id, request.params).await,
        "tasks/resubscribe" => tasks_resubscribe(state, scope, id, request.params).await,
        method => Json(JsonRpcResponse::err(
            id,
            JsonRpcError::method_not_found(method),
        ))
        .into_response(),
    }
}

// ─── message/send ─────────────────────────────────────────────────────────────

async fn message_send(
    state: Arc<AppState>,
    scope: ExecutionScope,
    id: Value,
    params: Value,
) -> Response {
    let params: MessageSendParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return invalid_params(id, e),
    };

    // Blocking is the default for direct chat use. The context id is
    // resolved here, where the optional task reference is in scope.
    let blocking = params.configuration.blocking.unwrap_or(true);
    let context_id = effective_context_id(&params.message, params.task.as_ref());

    if blocking {
        let ids = TurnIds {
            task_id: None,
            context_id: Some(context_id),
        };
        match state
            .executor
            .execute_with_ids(&scope, &params.message, ids)
            .await
        {
            Ok(outcome) => {
                let result = match (&outcome.transfer_target, outcome.reply.clone()) {
                    // Transfers surface as the task carrying the transfer
                    // artifact; plain replies surface as the message itself.
                    (Some(_), _) | (None, None) => SendResult::Task(outcome.wire_task()),
                    (None, Some(reply)) => SendResult::Message(reply),
                };
                match serde_json::to_value(&result) {
                    Ok(value) => Json(JsonRpcResponse::ok(id, value)).into_response(),
                    Err(e) => {
                        Json(JsonRpcResponse::err(id, JsonRpcError::internal(e.to_string())))
                            .into_response()
                    }
                }
            }
            Err(e) => executor_error_response(id, e),
        }
    } else {
        // The snapshot handed back and the detached turn must reference the
        // same task and conversation.
        let task_id = crate::short_id();
        let snapshot = WireTask::working(&task_id, &context_id);

        let executor = state.executor.clone();
        let message = params.message.clone();
        let ids = TurnIds {
            task_id: Some(task_id.clone()),
            context_id: Some(context_id.clone()),
        };
        tokio::spawn(async move {
            if let Err(e) = executor.execute_with_ids(&scope, &message, ids).await {
                tracing::warn!(error = %e, "non-blocking turn failed");
            }
        });

        match serde_json::to_value(&snapshot) {
            Ok(value) => Json(JsonRpcResponse::ok(id, value)).into_response(),
            Err(e) => Json(JsonRpcResponse::err(id, JsonRpcError::internal(e.to_string())))
                .into_response(),
        }
    }
}

// ─── message/stream ───────────────────────────────────────────────────────────

async fn message_stream(
    state: Arc<AppState>,
    scope: ExecutionScope,
    id: Value,
    params: Value,
    headers: &HeaderMap,
) -> Response {
    if !state.config.server.streaming_enabled {
        return Json(JsonRpcResponse::err(
            id,
            JsonRpcError::capability_not_supported("streaming is disabled"),
        ))
        .into_response();
    }
    if !accepts_event_stream(headers) {
        let error = JsonRpcError::invalid_request()
            .with_data(Value::String("Accept: text/event-stream required".into()));
        return Json(JsonRpcResponse::err(id, error)).into_response();
    }

    let params: MessageSendParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return invalid_params(id, e),
    };

    let task_id = crate::short_id();
    // Register before spawning so no event can be missed.
    let control = state.executor.control().clone();
    let events = control.register(&task_id).subscribe();

    let executor = state.executor.clone();
    let message = params.message.clone();
    let ids = TurnIds {
        task_id: Some(task_id.clone()),
        context_id: Some(effective_context_id(&params.message, params.task.as_ref())),
    };
    tokio::spawn(async move {
        if let Err(e) = executor.execute_with_ids(&scope, &message, ids).await {
            tracing::debug!(error = %e, "streaming turn ended with error");
        }
    });

    bridge_stream(id, None, events, control, task_id).into_response()
}

// ─── tasks/* ──────────────────────────────────────────────────────────────────

async fn tasks_get(
    state: Arc<AppState>,
    scope: ExecutionScope,
    id: Value,
    params: Value,
) -> Response {
    let params: TaskIdParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return invalid_params(id, e),
    };

    match load_wire_task(&state, &scope, &params.id) {
        Ok(Some(task)) => match serde_json::to_value(&task) {
            Ok(value) => Json(JsonRpcResponse::ok(id, value)).into_response(),
            Err(e) => Json(JsonRpcResponse::err(id, JsonRpcError::internal(e.to_string())))
                .into_response(),
        },
        Ok(None) => task_not_found(id),
        Err(error) => Json(JsonRpcResponse::err(id, error)).into_response(),
    }
}

async fn tasks_cancel(
    state: Arc<AppState>,
    scope: ExecutionScope,
    id: Value,
    params: Value,
) -> Response {
    let params: TaskIdParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return invalid_params(id, e),
    };

    match state.executor.cancel_task(&scope, &params.id) {
        Ok(true) => {
            Json(JsonRpcResponse::ok(id, serde_json::json!({"success": true}))).into_response()
        }
        Ok(false) => task_not_found(id),
        Err(e) => Json(JsonRpcResponse::err(id, JsonRpcError::internal(e.to_string())))
            .into_response(),
    }
}

async fn tasks_resubscribe(
    state: Arc<AppState>,
    scope: ExecutionScope,
    id: Value,
    params: Value,
) -> Response {
    if !state.config.server.streaming_enabled {
        return Json(JsonRpcResponse::err(
            id,
            JsonRpcError::capability_not_supported("streaming is disabled"),
        ))
        .into_response();
    }

    let params: TaskIdParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return invalid_params(id, e),
    };

    let snapshot = match load_wire_task(&state, &scope, &params.id) {
        Ok(Some(task)) => task,
        Ok(None) => return task_not_found(id),
        Err(error) => return Json(JsonRpcResponse::err(id, error)).into_response(),
    };

    // A still-working task gets a live tail after the snapshot; anything
    // terminal is snapshot-and-close. No historical frame replay.
    let control = state.executor.control().clone();
    match control.subscribe(&params.id) {
        Some(events) => {
            bridge_stream(id, Some(snapshot), events, control, params.id).into_response()
        }
        None => snapshot_stream(id, snapshot).into_response(),
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Accept is satisfied by an explicit `text/event-stream` or a wildcard.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream") || accept.contains("*/*"))
}

fn load_wire_task(
    state: &AppState,
    scope: &ExecutionScope,
    task_id: &str,
) -> Result<Option<WireTask>, JsonRpcError> {
    let mut conn = state
        .pool
        .get()
        .map_err(|e| JsonRpcError::internal(e.to_string()))?;
    let task = Task::find(&mut conn, &scope.tenant_id, &scope.project_id, task_id)
        .map_err(|e| JsonRpcError::internal(e.to_string()))?;
    let Some(task) = task else { return Ok(None) };

    let artifacts = Artifact::list_for_task(&mut conn, &scope.tenant_id, &scope.project_id, task_id)
        .map_err(|e| JsonRpcError::internal(e.to_string()))?;
    Ok(Some(WireTask::from_row(&task, &artifacts)))
}

fn invalid_params(id: Value, e: serde_json::Error) -> Response {
    let error = JsonRpcError::invalid_request().with_data(Value::String(e.to_string()));
    Json(JsonRpcResponse::err(id, error)).into_response()
}

fn task_not_found(id: Value) -> Response {
    Json(JsonRpcResponse::err(
        id,
        JsonRpcError::internal("task not found"),
    ))
    .into_response()
}

fn executor_error_response(id: Value, e: ExecutorError) -> Response {
    let error = match &e {
        ExecutorError::AgentNotFound => JsonRpcError::internal("agent not found"),
        ExecutorError::DeadlineExceeded => JsonRpcError::internal("timeout"),
        ExecutorError::Canceled => JsonRpcError::internal("canceled"),
        other => {
            let correlation_id = crate::short_id();
            tracing::error!(correlation = %correlation_id, error = %other, "turn failed");
            JsonRpcError::internal(format!("correlation id: {correlation_id}"))
        }
    };
    Json(JsonRpcResponse::err(id, error)).into_response()
}
