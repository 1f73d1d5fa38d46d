//! Streaming bridge: executor events → SSE frames.
//!
//! Each frame is `data: <json>\n\n` carrying a JSON-RPC response envelope
//! whose `id` echoes the originating request and whose `result` is one of
//! `Task`, `Message`, `TaskStatusUpdateEvent`, `TaskArtifactUpdateEvent`.
//! Errors after the first frame arrive as a terminal JSON-RPC error frame;
//! the content type never changes mid-stream.
//!
//! The bridge owns disconnect handling: when the client goes away the
//! forwarder's send fails, the task's cancellation flag is set, and the
//! executor stops at its next safe point.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::a2a::{JsonRpcError, JsonRpcResponse, WireTask};
use crate::executor::{ExecutorEvent, TaskControl};

/// Frames larger than this are replaced with an error frame instead of being
/// chunked mid-JSON.
const MAX_FRAME_BYTES: usize = 64 * 1024;

fn envelope(id: &Value, event: &ExecutorEvent) -> JsonRpcResponse {
    match event {
        ExecutorEvent::Task(task) | ExecutorEvent::Final(task) => JsonRpcResponse::ok(
            id.clone(),
            serde_json::to_value(task).unwrap_or(Value::Null),
        ),
        ExecutorEvent::Status(status) => JsonRpcResponse::ok(
            id.clone(),
            serde_json::to_value(status).unwrap_or(Value::Null),
        ),
        ExecutorEvent::Artifact(artifact) => JsonRpcResponse::ok(
            id.clone(),
            serde_json::to_value(artifact).unwrap_or(Value::Null),
        ),
        ExecutorEvent::Message(message) => JsonRpcResponse::ok(
            id.clone(),
            serde_json::to_value(message).unwrap_or(Value::Null),
        ),
        ExecutorEvent::Error(detail) => {
            JsonRpcResponse::err(id.clone(), JsonRpcError::internal(detail.clone()))
        }
    }
}

fn build_frame(id: &Value, event: &ExecutorEvent) -> Option<Event> {
    let response = envelope(id, event);
    let payload = serde_json::to_string(&response).ok()?;
    if payload.len() > MAX_FRAME_BYTES {
        tracing::warn!(bytes = payload.len(), "dropping oversized SSE frame");
        let fallback = JsonRpcResponse::err(
            id.clone(),
            JsonRpcError::internal("event exceeded maximum frame size"),
        );
        return Event::default().json_data(&fallback).ok();
    }
    Some(Event::default().data(payload))
}

/// Bridge a live task's event channel onto an SSE response.
///
/// `lead` is an optional snapshot emitted before any live event — resubscribe
/// uses it so a reattaching client sees the current task state first. The
/// stream closes after the terminal event. If the client disconnects first,
/// the task is canceled.
pub fn bridge_stream(
    rpc_id: Value,
    lead: Option<WireTask>,
    mut events: broadcast::Receiver<ExecutorEvent>,
    control: TaskControl,
    task_id: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        if let Some(snapshot) = lead {
            if let Some(frame) = build_frame(&rpc_id, &ExecutorEvent::Task(snapshot)) {
                if tx.send(frame).await.is_err() {
                    control.cancel(&task_id);
                    return;
                }
            }
        }
        loop {
            match events.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    let Some(frame) = build_frame(&rpc_id, &event) else {
                        continue;
                    };
                    if tx.send(frame).await.is_err() {
                        // Client went away mid-stream.
                        tracing::debug!(task = %task_id, "SSE client disconnected, canceling task");
                        control.cancel(&task_id);
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(task = %task_id, missed = n, "SSE bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    sse_response(ReceiverStream::new(rx))
}

/// A snapshot-only stream: one `Task` frame, then close. Used by
/// `tasks/resubscribe` against tasks that already reached a terminal state.
pub fn snapshot_stream(
    rpc_id: Value,
    task: WireTask,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(1);
    if let Some(frame) = build_frame(&rpc_id, &ExecutorEvent::Final(task)) {
        let _ = tx.try_send(frame);
    }
    sse_response(ReceiverStream::new(rx))
}

fn sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Event> + Send + 'static,
{
    Sse::new(stream.map(Ok::<_, Infallible>)).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::WireMessage;

    #[test]
    fn frames_echo_the_rpc_id() {
        let event = ExecutorEvent::Task(WireTask::working("t1", "c1"));
        let response = envelope(&Value::from(42), &event);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["result"]["id"], "t1");
        assert_eq!(json["result"]["status"]["state"], "working");
    }

    #[test]
    fn error_event_becomes_error_envelope() {
        let event = ExecutorEvent::Error("model exploded".to_string());
        let response = envelope(&Value::from("req-1"), &event);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], -32603);
        assert_eq!(json["error"]["data"], "model exploded");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn oversized_frames_are_replaced() {
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        let event = ExecutorEvent::Message(WireMessage::agent_text(big, "c1", "t1"));
        let frame = build_frame(&Value::Null, &event);
        // A frame is still produced, but it is the error fallback.
        assert!(frame.is_some());
    }

    #[tokio::test]
    async fn disconnect_cancels_task() {
        let control = TaskControl::new();
        let handle = control.register("t1");
        let events = control.subscribe("t1").unwrap();

        let sse = bridge_stream(Value::Null, None, events, control.clone(), "t1".to_string());
        drop(sse);

        // With the receiver dropped, the next emit fails to forward and the
        // bridge cancels the task.
        handle.emit(ExecutorEvent::Task(WireTask::working("t1", "c1")));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(handle.is_canceled());
    }
}
