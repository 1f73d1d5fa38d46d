use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::{Artifact, ArtifactPart, Task, TaskStatus};

// ─── JSON-RPC 2.0 envelope ────────────────────────────────────────────────────

pub mod error_codes {
    pub const PARSE: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL: i64 = -32603;
    /// Extension: requested capability (e.g. streaming) not supported.
    pub const CAPABILITY_NOT_SUPPORTED: i64 = -32604;
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Echoed verbatim in every response: string, number, or null.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_valid_envelope(&self) -> bool {
        self.jsonrpc.as_deref() == Some("2.0") && !self.method.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_request() -> Self {
        Self::new(error_codes::INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, "Method not found")
            .with_data(Value::String(method.to_string()))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL, "Internal error").with_data(Value::String(detail.into()))
    }

    pub fn capability_not_supported(detail: impl Into<String>) -> Self {
        Self::new(
            error_codes::CAPABILITY_NOT_SUPPORTED,
            "Capability not supported",
        )
        .with_data(Value::String(detail.into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ─── A2A wire shapes ──────────────────────────────────────────────────────────

/// A part of a message or artifact on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WirePart {
    Text { text: String },
    Data { data: Value },
}

impl From<ArtifactPart> for WirePart {
    fn from(part: ArtifactPart) -> Self {
        match part {
            ArtifactPart::Text { text } => WirePart::Text { text },
            ArtifactPart::Data { data } => WirePart::Data { data },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireArtifact {
    pub artifact_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parts: Vec<WirePart>,
}

impl From<&Artifact> for WireArtifact {
    fn from(row: &Artifact) -> Self {
        Self {
            artifact_id: row.artifact_id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            parts: row.parts().into_iter().map(WirePart::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskStatus {
    pub state: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    pub id: String,
    pub context_id: String,
    pub status: WireTaskStatus,
    #[serde(default)]
    pub artifacts: Vec<WireArtifact>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WireTask {
    pub fn from_row(task: &Task, artifacts: &[Artifact]) -> Self {
        Self {
            id: task.id.clone(),
            context_id: task.context_id.clone(),
            status: WireTaskStatus {
                state: task.status(),
                timestamp: Some(task.updated_at.clone()),
            },
            artifacts: artifacts.iter().map(WireArtifact::from).collect(),
            kind: "task".to_string(),
            metadata: task.metadata(),
        }
    }

    /// Snapshot for a freshly started turn.
    pub fn working(task_id: &str, context_id: &str) -> Self {
        Self {
            id: task_id.to_string(),
            context_id: context_id.to_string(),
            status: WireTaskStatus {
                state: TaskStatus::Working,
                timestamp: Some(crate::database::now_rfc3339()),
            },
            artifacts: Vec::new(),
            kind: "task".to_string(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub role: String,
    pub parts: Vec<WirePart>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WireMessage {
    pub fn agent_text(text: impl Into<String>, context_id: &str, task_id: &str) -> Self {
        Self {
            role: "agent".to_string(),
            parts: vec![WirePart::Text { text: text.into() }],
            message_id: crate::short_id(),
            context_id: Some(context_id.to_string()),
            task_id: Some(task_id.to_string()),
            kind: "message".to_string(),
            metadata: None,
        }
    }

    /// Concatenated text content of every text part.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                WirePart::Text { text } => Some(text.as_str()),
                WirePart::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

// ─── Streaming events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: WireTaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub kind: String,
}

impl StatusUpdateEvent {
    pub fn new(task_id: &str, context_id: &str, state: TaskStatus, is_final: bool) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            status: WireTaskStatus {
                state,
                timestamp: Some(crate::database::now_rfc3339()),
            },
            is_final,
            kind: "status-update".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub artifact: WireArtifact,
    pub kind: String,
}

impl ArtifactUpdateEvent {
    pub fn new(task_id: &str, context_id: &str, artifact: WireArtifact) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            artifact,
            kind: "artifact-update".to_string(),
        }
    }
}

// ─── Method params ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendConfiguration {
    /// Blocking defaults to true for direct chat use.
    #[serde(default)]
    pub blocking: Option<bool>,
}

/// Optional reference to an existing task carried alongside a send. Its
/// conversation id ranks between the message's explicit `contextId` and the
/// metadata fallback during resolution.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendTaskRef {
    #[serde(default)]
    pub context: SendTaskContext,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendTaskContext {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: WireMessage,
    #[serde(default)]
    pub task: Option<SendTaskRef>,
    #[serde(default)]
    pub configuration: MessageSendConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub id: String,
}

/// The union a unary `message/send` can resolve to.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SendResult {
    Task(WireTask),
    Message(WireMessage),
}

/// Effective conversation id for a send: the explicit `contextId` wins unless
/// empty or the literal `"default"`, then `task.context.conversationId`, then
/// `metadata.conversationId`, then a freshly minted id.
pub fn effective_context_id(message: &WireMessage, task: Option<&SendTaskRef>) -> String {
    if let Some(context_id) = &message.context_id {
        if !context_id.is_empty() && context_id != "default" {
            return context_id.clone();
        }
    }
    if let Some(conversation_id) = task.and_then(|t| t.context.conversation_id.as_deref()) {
        if !conversation_id.is_empty() {
            return conversation_id.to_string();
        }
    }
    if let Some(conversation_id) = message.metadata_str("conversationId") {
        if !conversation_id.is_empty() {
            return conversation_id.to_string();
        }
    }
    crate::short_id()
}
