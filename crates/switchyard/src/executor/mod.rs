//! Task executor: one agent turn.
//!
//! ```text
//! resolve agent (active-agent override → graph default)
//!       │
//!       ▼
//! persist Task{working} + inbound message, ensure tool session
//!       │
//!       ▼
//! build prompt (history + artifacts + context variables)
//!       │
//!       ▼
//! model.complete() ──► no tool calls? ──► persist reply, complete task
//!       │
//!       ▼ tool calls present
//! transfer_to_agent → artifact + activeAgent swap + complete (one txn)
//! delegate_to_agent → sibling child turns fan out together, each result
//!                     becomes a tool record
//! anything else     → bound tool, result recorded in the session
//!       │
//!       ▼
//! iteration += 1, bounded; cancellation observed at every boundary
//! ```
//!
//! Ordering: per-conversation turns are serialized behind a keyed async
//! mutex; artifacts are persisted before the terminal message event is
//! emitted.

mod bindings;
mod cancel;
mod events;

pub use bindings::build_tool_bindings;
pub use cancel::{TaskControl, TaskHandle};
pub use events::ExecutorEvent;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use diesel::Connection;
use futures::future::join_all;
use serde_json::Value;

use crate::a2a::{
    ArtifactUpdateEvent, WireArtifact, WireMessage, WireTask, effective_context_id,
};
use crate::agents::{AgentRegistry, RegisteredAgent};
use crate::context::{ContextResolver, render_context_block};
use crate::conversations::{ConversationService, HistoryConfig, HistoryFilters, HistoryMode};
use crate::credentials::CredentialStoreRegistry;
use crate::database::models::{
    Artifact, ArtifactPart, ContextConfig, Conversation, Message, MessageType, MessageVisibility,
    NewArtifact, NewMessage, NewTask, Task, TaskStatus,
};
use crate::database::{DbError, DbPool};
use crate::llm::{ChatMessage, CompletionRequest, ModelProvider, ToolCall, ToolSpec};
use crate::scope::ExecutionScope;
use crate::tools::{FunctionSandboxPool, Tool, ToolOutcome, ToolResultRecord, ToolSessionManager};

const TRANSFER_TOOL: &str = "transfer_to_agent";
const DELEGATE_TOOL: &str = "delegate_to_agent";

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("agent not found")]
    AgentNotFound,

    #[error("turn canceled")]
    Canceled,

    #[error("turn deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Ledger(#[from] DbError),

    #[error("model provider error: {0}")]
    Provider(#[from] crate::llm::ProviderError),

    #[error("executor error: {0}")]
    Internal(String),
}

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub default_model: String,
    pub request_deadline: Duration,
    pub max_tool_iterations: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            request_deadline: Duration::from_secs(120),
            max_tool_iterations: 8,
        }
    }
}

/// Caller-allocated identities for a turn. Non-blocking and streaming
/// callers mint these up front so the snapshot they hand back references the
/// same task and conversation the detached turn persists.
#[derive(Debug, Clone, Default)]
pub struct TurnIds {
    pub task_id: Option<String>,
    pub context_id: Option<String>,
}

/// The result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub task: Task,
    pub artifacts: Vec<Artifact>,
    /// The agent's textual reply; `None` when the turn ended in a transfer.
    pub reply: Option<WireMessage>,
    /// Set when the turn ended by handing the conversation over.
    pub transfer_target: Option<String>,
    pub context_id: String,
    pub session_id: String,
}

impl TurnOutcome {
    pub fn wire_task(&self) -> WireTask {
        WireTask::from_row(&self.task, &self.artifacts)
    }
}

/// Who sent the inbound message for this turn.
#[derive(Debug, Clone)]
enum TurnOrigin {
    User,
    Peer {
        from_agent_id: String,
        external: bool,
    },
}

/// Orchestrates agent turns against the ledger, tool plane, and model seam.
pub struct TaskExecutor {
    pool: DbPool,
    registry: AgentRegistry,
    conversations: ConversationService,
    sessions: ToolSessionManager,
    sandbox: Arc<FunctionSandboxPool>,
    provider: Arc<dyn ModelProvider>,
    context_resolver: ContextResolver,
    credentials: CredentialStoreRegistry,
    control: TaskControl,
    context_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        provider: Arc<dyn ModelProvider>,
        sandbox: Arc<FunctionSandboxPool>,
        sessions: ToolSessionManager,
        credentials: CredentialStoreRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry: AgentRegistry::new(pool.clone()),
            conversations: ConversationService::new(pool.clone()),
            pool,
            sessions,
            sandbox,
            provider,
            context_resolver: ContextResolver::new(),
            credentials,
            control: TaskControl::new(),
            context_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    /// Execute one user-facing turn for an inbound A2A message. Serialized
    /// per conversation; bounded by the request deadline.
    pub async fn execute(
        &self,
        scope: &ExecutionScope,
        inbound: &WireMessage,
    ) -> Result<TurnOutcome, ExecutorError> {
        self.execute_with_ids(scope, inbound, TurnIds::default()).await
    }

    /// Like [`execute`](Self::execute) with caller-allocated ids, so
    /// non-blocking and streaming callers can reference the task and
    /// conversation before the turn finishes. A preset context id bypasses
    /// message-level resolution entirely: whoever minted it already ran
    /// [`effective_context_id`] and must hand the same value to the client.
    #[tracing::instrument(
        name = "executor.execute",
        skip_all,
        fields(scope = %scope, context = tracing::field::Empty)
    )]
    pub async fn execute_with_ids(
        &self,
        scope: &ExecutionScope,
        inbound: &WireMessage,
        ids: TurnIds,
    ) -> Result<TurnOutcome, ExecutorError> {
        let context_id = ids
            .context_id
            .unwrap_or_else(|| effective_context_id(inbound, None));
        tracing::Span::current().record("context", context_id.as_str());

        let origin = match (
            inbound.metadata_str("fromAgentId"),
            inbound.metadata_str("fromExternalAgentId"),
        ) {
            (Some(from), _) => TurnOrigin::Peer {
                from_agent_id: from.to_string(),
                external: false,
            },
            (None, Some(from)) => TurnOrigin::Peer {
                from_agent_id: from.to_string(),
                external: true,
            },
            (None, None) => TurnOrigin::User,
        };

        let lock = self.context_lock(&context_id);
        let _guard = lock.lock().await;

        let session_id = crate::short_id();
        let task_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let turn = self.run_turn(
            scope.clone(),
            None,
            context_id.clone(),
            inbound.text(),
            Some(inbound.message_id.clone()),
            origin,
            session_id.clone(),
            task_slot.clone(),
            ids.task_id,
        );

        let result = match tokio::time::timeout(self.config.request_deadline, turn).await {
            Ok(result) => result,
            Err(_) => {
                self.fail_timed_out_task(scope, &task_slot, &context_id);
                Err(ExecutorError::DeadlineExceeded)
            }
        };

        // The graph execution is over either way; the scratchpad goes with it.
        self.sessions.end_session(&session_id);
        result
    }

    /// Signal cancellation for a task. Live turns observe the flag at the
    /// next safe point; a task with no live turn is marked canceled directly.
    ///
    /// Ownership is checked before anything else: a task outside this scope
    /// is indistinguishable from a missing one, live or not.
    pub fn cancel_task(&self, scope: &ExecutionScope, task_id: &str) -> Result<bool, DbError> {
        let task = {
            let mut conn = self.pool.get()?;
            Task::find(&mut conn, &scope.tenant_id, &scope.project_id, task_id)?
        };
        let Some(task) = task else {
            return Ok(false);
        };

        if self.control.cancel(task_id) {
            return Ok(true);
        }
        if task.status() == TaskStatus::Working {
            let mut conn = self.pool.get()?;
            Task::set_status(
                &mut conn,
                &scope.tenant_id,
                &scope.project_id,
                task_id,
                TaskStatus::Canceled,
            )?;
        }
        Ok(true)
    }

    // ─── Turn internals ───────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        scope: ExecutionScope,
        agent_override: Option<String>,
        context_id: String,
        inbound_text: String,
        inbound_message_id: Option<String>,
        origin: TurnOrigin,
        session_id: String,
        task_slot: Arc<Mutex<Option<String>>>,
        preset_task_id: Option<String>,
    ) -> Result<TurnOutcome, ExecutorError> {
        // ── Resolve agent and conversation ────────────────────────────────
        let (agent, thread_created) =
            self.resolve_turn_agent(&scope, agent_override.as_deref(), &context_id)?;

        // ── Start the task ────────────────────────────────────────────────
        let task_id = preset_task_id.unwrap_or_else(crate::short_id);
        {
            let mut conn = self.pool.get().map_err(DbError::from)?;
            Task::insert(
                &mut conn,
                &NewTask::working(
                    &scope.tenant_id,
                    &scope.project_id,
                    &scope.graph_id,
                    &task_id,
                    &context_id,
                    &agent.definition.id,
                )
                .with_metadata(&serde_json::json!({
                    "inboundMessageId": inbound_message_id,
                    "sessionId": session_id,
                })),
            )?;
        }
        if let Ok(mut slot) = task_slot.lock() {
            *slot = Some(task_id.clone());
        }

        let handle = self.control.register(&task_id);
        handle.emit(ExecutorEvent::Task(WireTask::working(&task_id, &context_id)));

        let result = self
            .drive_turn(
                &scope,
                &agent,
                thread_created,
                &context_id,
                &task_id,
                &inbound_text,
                inbound_message_id.as_deref(),
                &origin,
                &session_id,
                &handle,
            )
            .await;

        match &result {
            Ok(outcome) => {
                if let Some(reply) = &outcome.reply {
                    handle.emit(ExecutorEvent::Message(reply.clone()));
                }
                handle.emit(ExecutorEvent::Final(outcome.wire_task()));
            }
            Err(ExecutorError::Canceled) => {
                let mut snapshot = WireTask::working(&task_id, &context_id);
                snapshot.status.state = TaskStatus::Canceled;
                handle.emit(ExecutorEvent::Final(snapshot));
            }
            Err(e) => {
                self.record_turn_failure(&scope, &context_id, &task_id, &agent.definition.id, e);
                handle.emit(ExecutorEvent::Error(e.to_string()));
            }
        }
        self.control.finish(&task_id);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_turn(
        &self,
        scope: &ExecutionScope,
        agent: &RegisteredAgent,
        thread_created: bool,
        context_id: &str,
        task_id: &str,
        inbound_text: &str,
        inbound_message_id: Option<&str>,
        origin: &TurnOrigin,
        session_id: &str,
        handle: &TaskHandle,
    ) -> Result<TurnOutcome, ExecutorError> {
        // ── Persist the inbound message ───────────────────────────────────
        let inbound_id = self.persist_inbound(
            scope,
            context_id,
            task_id,
            &agent.definition.id,
            inbound_text,
            inbound_message_id,
            origin,
        )?;

        self.sessions
            .ensure_graph_session(session_id, scope, context_id, task_id);

        // ── Prompt context ────────────────────────────────────────────────
        let history_config = HistoryConfig::from_json(agent.definition.history_config_json.as_deref());
        let filters = if history_config.mode == HistoryMode::Scoped {
            HistoryFilters {
                agent_id: Some(agent.definition.id.clone()),
                task_id: None,
            }
        } else {
            HistoryFilters::default()
        };

        let history = self.conversations.formatted_history(
            scope,
            context_id,
            &history_config,
            &filters,
            Some(&inbound_id),
        )?;
        let artifacts =
            self.conversations
                .scoped_artifacts(scope, context_id, &history_config, &filters);

        let context_block = self
            .resolve_context_variables(scope, thread_created)
            .await
            .map(|vars| render_context_block(&vars))
            .unwrap_or_default();

        let mut system_prompt = agent.definition.prompt.clone();
        system_prompt.push_str(&context_block);
        if !history.is_empty() {
            system_prompt.push_str("\n\nConversation so far:\n");
            system_prompt.push_str(&history);
        }
        if !artifacts.is_empty() {
            system_prompt.push_str("\n\nArtifacts available:");
            for artifact in &artifacts {
                system_prompt.push_str(&format!("\n- {} ({})", artifact.name, artifact.artifact_id));
            }
        }

        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(inbound_text.to_string()),
        ];

        // ── Tools ─────────────────────────────────────────────────────────
        let bindings = build_tool_bindings(
            &self.pool,
            scope,
            &agent.definition.tool_ids(),
            &self.sandbox,
            &self.credentials,
        )
        .await;
        let tool_specs = self.tool_specs(agent, &bindings);
        let model = self.resolve_model(agent);
        let max_iterations = parse_step_limit(agent.graph.stop_when_json.as_deref())
            .unwrap_or(self.config.max_tool_iterations);

        // ── Model / tool loop ─────────────────────────────────────────────
        for _iteration in 0..max_iterations {
            if handle.is_canceled() {
                self.mark_status(scope, task_id, TaskStatus::Canceled)?;
                return Err(ExecutorError::Canceled);
            }

            let request = CompletionRequest::new(model.clone(), messages.clone())
                .with_tools(tool_specs.clone());
            let response = self.provider.complete(request).await?;

            if response.tool_calls.is_empty() {
                return self.finish_with_reply(
                    scope,
                    agent,
                    context_id,
                    task_id,
                    session_id,
                    origin,
                    response.content,
                );
            }

            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // A transfer ends the turn at the decision point, before any
            // sibling call runs.
            if let Some(call) = response.tool_calls.iter().find(|c| c.name == TRANSFER_TOOL) {
                return self.finish_with_transfer(
                    scope, agent, context_id, task_id, session_id, handle, call,
                );
            }

            if handle.is_canceled() {
                self.mark_status(scope, task_id, TaskStatus::Canceled)?;
                return Err(ExecutorError::Canceled);
            }

            // Delegations in one response fan out concurrently; results are
            // fed back to the model in the order the calls were issued.
            let mut delegated: HashMap<String, ToolOutcome> = join_all(
                response
                    .tool_calls
                    .iter()
                    .filter(|c| c.name == DELEGATE_TOOL)
                    .map(|call| async move {
                        let outcome = self
                            .run_delegation(scope, agent, context_id, session_id, call)
                            .await;
                        (call.id.clone(), outcome)
                    }),
            )
            .await
            .into_iter()
            .collect();

            for call in &response.tool_calls {
                if handle.is_canceled() {
                    self.mark_status(scope, task_id, TaskStatus::Canceled)?;
                    return Err(ExecutorError::Canceled);
                }

                let payload = match call.name.as_str() {
                    DELEGATE_TOOL => delegated
                        .remove(&call.id)
                        .unwrap_or_else(|| ToolOutcome::err("delegation produced no result")),
                    name => match bindings.iter().find(|b| b.name() == name) {
                        Some(tool) => tool
                            .execute(call.arguments.clone())
                            .await
                            .unwrap_or_else(ToolOutcome::err),
                        None => ToolOutcome::err(format!("unknown tool: {name}")),
                    },
                };
                self.record_call(session_id, call, &payload);
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    payload.to_model_payload(),
                ));
            }
        }

        tracing::warn!(task = task_id, "max tool iterations reached");
        self.finish_with_reply(
            scope,
            agent,
            context_id,
            task_id,
            session_id,
            origin,
            "I could not complete the request within the allowed number of tool steps.".to_string(),
        )
    }

    // ─── Terminal paths ───────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn finish_with_reply(
        &self,
        scope: &ExecutionScope,
        agent: &RegisteredAgent,
        context_id: &str,
        task_id: &str,
        session_id: &str,
        origin: &TurnOrigin,
        content: String,
    ) -> Result<TurnOutcome, ExecutorError> {
        let mut conn = self.pool.get().map_err(DbError::from)?;

        let reply_row = match origin {
            TurnOrigin::User => NewMessage::new(
                &scope.tenant_id,
                &scope.project_id,
                context_id,
                "agent",
                &content,
                MessageType::Chat,
                MessageVisibility::UserFacing,
            )
            .from_agent(&agent.definition.id)
            .with_task(task_id),
            TurnOrigin::Peer {
                from_agent_id,
                external,
            } => {
                let base = NewMessage::new(
                    &scope.tenant_id,
                    &scope.project_id,
                    context_id,
                    "agent",
                    &content,
                    MessageType::A2aResponse,
                    if *external {
                        MessageVisibility::External
                    } else {
                        MessageVisibility::Internal
                    },
                )
                .from_agent(&agent.definition.id)
                .with_a2a_task(task_id);
                if *external {
                    base.to_external_agent(from_agent_id)
                } else {
                    base.to_agent(from_agent_id)
                }
            }
        };

        conn.transaction::<_, DbError, _>(|conn| {
            Message::insert(conn, &reply_row)?;
            Task::set_status(
                conn,
                &scope.tenant_id,
                &scope.project_id,
                task_id,
                TaskStatus::Completed,
            )?;
            Task::merge_metadata(
                conn,
                &scope.tenant_id,
                &scope.project_id,
                task_id,
                &serde_json::json!({"responseMessageId": reply_row.id}),
            )?;
            Ok(())
        })?;

        let task = Task::find(&mut conn, &scope.tenant_id, &scope.project_id, task_id)?
            .ok_or_else(|| ExecutorError::Internal("task vanished".into()))?;
        let artifacts =
            Artifact::list_for_task(&mut conn, &scope.tenant_id, &scope.project_id, task_id)?;

        let mut reply = WireMessage::agent_text(content, context_id, task_id);
        reply.message_id = reply_row.id.clone();

        Ok(TurnOutcome {
            task,
            artifacts,
            reply: Some(reply),
            transfer_target: None,
            context_id: context_id.to_string(),
            session_id: session_id.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_with_transfer(
        &self,
        scope: &ExecutionScope,
        agent: &RegisteredAgent,
        context_id: &str,
        task_id: &str,
        session_id: &str,
        handle: &TaskHandle,
        call: &ToolCall,
    ) -> Result<TurnOutcome, ExecutorError> {
        let target_id = call
            .arguments
            .get("agentId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let reason = call
            .arguments
            .get("reason")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let Some(target) = agent.transfer_target(&target_id) else {
            return Err(ExecutorError::Internal(format!(
                "model requested transfer to unknown agent: {target_id}"
            )));
        };
        if target.external {
            return Err(ExecutorError::Internal(
                "transfer to external agents is not supported; use delegation".into(),
            ));
        }

        let mut data = serde_json::json!({
            "type": "transfer",
            "targetAgentId": target.id,
            "fromAgentId": agent.definition.id,
        });
        if let Some(reason) = &reason {
            data["reason"] = Value::String(reason.clone());
        }
        let parts = vec![
            ArtifactPart::Text {
                text: format!("Transferring conversation to {}", target.name),
            },
            ArtifactPart::Data { data },
        ];
        let artifact_row = NewArtifact::new(
            &scope.tenant_id,
            &scope.project_id,
            task_id,
            "transfer",
            "Conversation handoff",
            &parts,
        )?;

        let handoff_note = NewMessage::new(
            &scope.tenant_id,
            &scope.project_id,
            context_id,
            "agent",
            reason.clone().unwrap_or_else(|| "Conversation transferred".to_string()),
            MessageType::A2aRequest,
            MessageVisibility::Internal,
        )
        .from_agent(&agent.definition.id)
        .to_agent(&target.id)
        .with_a2a_task(task_id);

        // The handoff is atomic: artifact, active-agent swap, task completion.
        let mut conn = self.pool.get().map_err(DbError::from)?;
        conn.transaction::<_, DbError, _>(|conn| {
            Artifact::insert(conn, &artifact_row)?;
            Message::insert(conn, &handoff_note)?;
            Conversation::set_active_agent(
                conn,
                &scope.tenant_id,
                &scope.project_id,
                context_id,
                &target.id,
            )?;
            Task::set_status(
                conn,
                &scope.tenant_id,
                &scope.project_id,
                task_id,
                TaskStatus::Completed,
            )?;
            Ok(())
        })?;

        let task = Task::find(&mut conn, &scope.tenant_id, &scope.project_id, task_id)?
            .ok_or_else(|| ExecutorError::Internal("task vanished".into()))?;
        let artifacts =
            Artifact::list_for_task(&mut conn, &scope.tenant_id, &scope.project_id, task_id)?;

        if let Some(row) = artifacts.last() {
            handle.emit(ExecutorEvent::Artifact(ArtifactUpdateEvent::new(
                task_id,
                context_id,
                WireArtifact::from(row),
            )));
        }

        tracing::info!(
            from = %agent.definition.id,
            to = %target.id,
            context = context_id,
            "conversation transferred"
        );

        Ok(TurnOutcome {
            task,
            artifacts,
            reply: None,
            transfer_target: Some(target.id.clone()),
            context_id: context_id.to_string(),
            session_id: session_id.to_string(),
        })
    }

    // ─── Delegation ───────────────────────────────────────────────────────────

    async fn run_delegation(
        &self,
        scope: &ExecutionScope,
        agent: &RegisteredAgent,
        context_id: &str,
        session_id: &str,
        call: &ToolCall,
    ) -> ToolOutcome {
        let target_id = call
            .arguments
            .get("agentId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let task_text = call
            .arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let Some(target) = agent.delegate_target(&target_id).cloned() else {
            return ToolOutcome::err(format!("unknown delegation target: {target_id}"));
        };

        if target.external {
            return self.delegate_external(&target.id, &task_text).await;
        }

        // Child turn: new task, same conversation, same tool session so the
        // parent can see the child's tool results.
        let child = self.run_turn_boxed(
            scope.clone(),
            Some(target.id.clone()),
            context_id.to_string(),
            task_text,
            None,
            TurnOrigin::Peer {
                from_agent_id: agent.definition.id.clone(),
                external: false,
            },
            session_id.to_string(),
            Arc::new(Mutex::new(None)),
            None,
        );

        match child.await {
            Ok(outcome) => {
                let reply_text = outcome.reply.map(|m| m.text()).unwrap_or_default();
                ToolOutcome::ok(serde_json::json!({
                    "agentId": target.id,
                    "taskId": outcome.task.id,
                    "result": reply_text,
                }))
            }
            Err(e) => ToolOutcome::err(format!("delegation to {} failed: {e}", target.id)),
        }
    }

    /// Delegate to an out-of-graph agent over its A2A endpoint.
    async fn delegate_external(&self, url: &str, task_text: &str) -> ToolOutcome {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": crate::short_id(),
            "method": "message/send",
            "params": {
                "message": {
                    "role": "agent",
                    "parts": [{"kind": "text", "text": task_text}],
                    "messageId": crate::short_id(),
                    "kind": "message",
                },
                "configuration": {"blocking": true}
            }
        });

        let client = reqwest::Client::new();
        let response = client
            .post(url)
            .json(&request)
            .timeout(Duration::from_secs(60))
            .send()
            .await;

        let body: Value = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(body) => body,
                Err(e) => return ToolOutcome::err(format!("external agent response: {e}")),
            },
            Ok(resp) => return ToolOutcome::err(format!("external agent returned {}", resp.status())),
            Err(e) => return ToolOutcome::err(format!("external agent unreachable: {e}")),
        };

        if let Some(error) = body.get("error") {
            return ToolOutcome::err(format!("external agent error: {error}"));
        }
        ToolOutcome::ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Boxed indirection so delegation can recurse through `run_turn`.
    #[allow(clippy::too_many_arguments)]
    fn run_turn_boxed<'a>(
        &'a self,
        scope: ExecutionScope,
        agent_override: Option<String>,
        context_id: String,
        inbound_text: String,
        inbound_message_id: Option<String>,
        origin: TurnOrigin,
        session_id: String,
        task_slot: Arc<Mutex<Option<String>>>,
        preset_task_id: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<TurnOutcome, ExecutorError>> + Send + 'a>> {
        Box::pin(self.run_turn(
            scope,
            agent_override,
            context_id,
            inbound_text,
            inbound_message_id,
            origin,
            session_id,
            task_slot,
            preset_task_id,
        ))
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    fn resolve_turn_agent(
        &self,
        scope: &ExecutionScope,
        agent_override: Option<&str>,
        context_id: &str,
    ) -> Result<(RegisteredAgent, bool), ExecutorError> {
        let mut conn = self.pool.get().map_err(DbError::from)?;
        let graph = crate::database::models::AgentGraph::find(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            &scope.graph_id,
        )?
        .ok_or(ExecutorError::AgentNotFound)?;

        let initial_agent = agent_override
            .map(str::to_string)
            .or_else(|| scope.agent_id.clone())
            .unwrap_or_else(|| graph.default_agent_id.clone());

        let (conversation, created) = Conversation::find_or_create(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            context_id,
            &initial_agent,
        )?;
        drop(conn);

        // The active agent owns the thread unless the caller pinned one.
        let agent_id = agent_override
            .map(str::to_string)
            .or_else(|| conversation.active_agent_id.clone())
            .unwrap_or(initial_agent);

        let agent = self
            .registry
            .get_registered_agent_by_id(scope, &agent_id)?
            .ok_or(ExecutorError::AgentNotFound)?;

        Ok((agent, created))
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_inbound(
        &self,
        scope: &ExecutionScope,
        context_id: &str,
        task_id: &str,
        agent_id: &str,
        text: &str,
        inbound_message_id: Option<&str>,
        origin: &TurnOrigin,
    ) -> Result<String, ExecutorError> {
        let row = match origin {
            TurnOrigin::User => {
                let mut row = NewMessage::new(
                    &scope.tenant_id,
                    &scope.project_id,
                    context_id,
                    "user",
                    text,
                    MessageType::Chat,
                    MessageVisibility::UserFacing,
                )
                .with_task(task_id);
                if let Some(id) = inbound_message_id {
                    row = row.with_id(id);
                }
                row
            }
            TurnOrigin::Peer {
                from_agent_id,
                external,
            } => {
                let base = NewMessage::new(
                    &scope.tenant_id,
                    &scope.project_id,
                    context_id,
                    "agent",
                    text,
                    MessageType::A2aRequest,
                    if *external {
                        MessageVisibility::External
                    } else {
                        MessageVisibility::Internal
                    },
                )
                .to_agent(agent_id)
                .with_a2a_task(task_id);
                if *external {
                    base.from_external_agent(from_agent_id)
                } else {
                    base.from_agent(from_agent_id)
                }
            }
        };

        let id = row.id.clone();
        self.conversations.append_message(&row)?;
        Ok(id)
    }

    async fn resolve_context_variables(
        &self,
        scope: &ExecutionScope,
        thread_created: bool,
    ) -> Option<std::collections::BTreeMap<String, Value>> {
        let config = {
            let mut conn = self.pool.get().ok()?;
            ContextConfig::find_for_graph(
                &mut conn,
                &scope.tenant_id,
                &scope.project_id,
                &scope.graph_id,
            )
            .ok()
            .flatten()?
        };
        let variables = config.variables();
        if variables.is_empty() {
            return None;
        }
        Some(self.context_resolver.resolve(&variables, thread_created).await)
    }

    fn tool_specs(&self, agent: &RegisteredAgent, bindings: &[Arc<dyn Tool>]) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = bindings
            .iter()
            .map(|b| ToolSpec {
                name: b.name().to_string(),
                description: b.description().to_string(),
                parameters: b.parameters_schema(),
            })
            .collect();

        if !agent.transfer_targets.is_empty() {
            let ids: Vec<&str> = agent.transfer_targets.iter().map(|t| t.id.as_str()).collect();
            specs.push(ToolSpec {
                name: TRANSFER_TOOL.to_string(),
                description: format!(
                    "Hand the conversation over to another agent. Targets: {}",
                    describe_targets(&agent.transfer_targets)
                ),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "agentId": {"type": "string", "enum": ids},
                        "reason": {"type": "string"}
                    },
                    "required": ["agentId"]
                }),
            });
        }
        if !agent.delegate_targets.is_empty() {
            let ids: Vec<&str> = agent.delegate_targets.iter().map(|t| t.id.as_str()).collect();
            specs.push(ToolSpec {
                name: DELEGATE_TOOL.to_string(),
                description: format!(
                    "Dispatch a sub-task to another agent and get its result back. Targets: {}",
                    describe_targets(&agent.delegate_targets)
                ),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "agentId": {"type": "string", "enum": ids},
                        "message": {"type": "string"}
                    },
                    "required": ["agentId", "message"]
                }),
            });
        }
        specs
    }

    fn resolve_model(&self, agent: &RegisteredAgent) -> String {
        parse_model(agent.definition.models_json.as_deref())
            .or_else(|| parse_model(agent.graph.models_json.as_deref()))
            .unwrap_or_else(|| self.config.default_model.clone())
    }

    fn record_call(&self, session_id: &str, call: &ToolCall, outcome: &ToolOutcome) {
        self.sessions.record_tool_result(
            session_id,
            ToolResultRecord {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
                result: serde_json::json!({
                    "success": outcome.success,
                    "result": outcome.result,
                }),
                timestamp: crate::database::now_rfc3339(),
            },
        );
    }

    fn mark_status(
        &self,
        scope: &ExecutionScope,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), ExecutorError> {
        let mut conn = self.pool.get().map_err(DbError::from)?;
        Task::set_status(&mut conn, &scope.tenant_id, &scope.project_id, task_id, status)?;
        Ok(())
    }

    fn record_turn_failure(
        &self,
        scope: &ExecutionScope,
        context_id: &str,
        task_id: &str,
        agent_id: &str,
        error: &ExecutorError,
    ) {
        if let Err(e) = self.mark_status(scope, task_id, TaskStatus::Failed) {
            tracing::warn!(task = task_id, error = %e, "failed to mark task failed");
        }
        let note = NewMessage::new(
            &scope.tenant_id,
            &scope.project_id,
            context_id,
            "system",
            format!("turn failed: {error}"),
            MessageType::System,
            MessageVisibility::Internal,
        )
        .from_agent(agent_id)
        .with_task(task_id);
        if let Err(e) = self.conversations.append_message(&note) {
            tracing::warn!(task = task_id, error = %e, "failed to persist failure note");
        }
    }

    fn fail_timed_out_task(
        &self,
        scope: &ExecutionScope,
        task_slot: &Arc<Mutex<Option<String>>>,
        context_id: &str,
    ) {
        let task_id = task_slot.lock().ok().and_then(|slot| slot.clone());
        let Some(task_id) = task_id else { return };
        if let Err(e) = self.mark_status(scope, &task_id, TaskStatus::Failed) {
            tracing::warn!(task = %task_id, error = %e, "failed to mark timed-out task");
        }
        let note = NewMessage::new(
            &scope.tenant_id,
            &scope.project_id,
            context_id,
            "system",
            "turn failed: timeout",
            MessageType::System,
            MessageVisibility::Internal,
        )
        .with_task(&task_id);
        let _ = self.conversations.append_message(&note);
        self.control.finish(&task_id);
    }

    fn context_lock(&self, context_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.context_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(context_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn describe_targets(targets: &[crate::agents::HandoffTarget]) -> String {
    targets
        .iter()
        .map(|t| {
            if t.description.is_empty() {
                format!("{} ({})", t.id, t.name)
            } else {
                format!("{} ({}): {}", t.id, t.name, t.description)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Graph-level stop condition: `{"stepCountIs": N}` bounds the tool loop.
fn parse_step_limit(raw: Option<&str>) -> Option<usize> {
    let value: Value = serde_json::from_str(raw?).ok()?;
    value
        .get("stepCountIs")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).max(1))
}

/// Accepts `"model-name"` or `{"model": …}` / `{"default": …}` documents.
fn parse_model(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let value: Value = serde_json::from_str(raw).ok()?;
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(map) => map
            .get("model")
            .or_else(|| map.get("default"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
