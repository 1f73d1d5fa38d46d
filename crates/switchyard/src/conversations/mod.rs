//! Conversation service: message reads/writes with visibility scoping, and
//! history shaping for LLM prompts.
//!
//! History shaping is contract, not heuristics:
//! - mode `none` → empty (and artifact scoping yields empty too);
//! - mode `full` → everything passing the type/visibility filters, in
//!   creation order;
//! - mode `scoped` → user messages always survive; agent messages survive
//!   only when every active filter (agent and/or task) matches.
//!
//! Artifact scoping is fail-closed: on any error the caller gets an empty
//! set, never the unscoped universe.

mod history;

pub use history::{HistoryConfig, HistoryFilters, HistoryMode, estimate_tokens, shape_history};

use crate::database::models::{Artifact, Message, NewMessage};
use crate::database::{DbError, DbPool};
use crate::scope::ExecutionScope;

/// Reads and writes conversation messages, and builds scoped prompt inputs.
#[derive(Clone)]
pub struct ConversationService {
    pool: DbPool,
}

impl ConversationService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Unconditional insert.
    pub fn append_message(&self, msg: &NewMessage) -> Result<(), DbError> {
        let mut conn = self.pool.get()?;
        Message::insert(&mut conn, msg)
    }

    /// The shaped message list for one conversation.
    pub fn history(
        &self,
        scope: &ExecutionScope,
        conversation_id: &str,
        config: &HistoryConfig,
        filters: &HistoryFilters,
    ) -> Result<Vec<Message>, DbError> {
        if config.mode == HistoryMode::None {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get()?;
        let all = Message::list_for_conversation(
            &mut conn,
            &scope.tenant_id,
            &scope.project_id,
            conversation_id,
        )?;
        Ok(shape_history(all, config, filters))
    }

    /// Deterministic rendering of the shaped history for the LLM prompt.
    ///
    /// Each line reads `label: """text"""`. The message matching
    /// `current_message_id` is dropped so the prompt does not duplicate the
    /// inbound turn. When a token budget trims messages, a synthetic system
    /// line records how many were omitted.
    pub fn formatted_history(
        &self,
        scope: &ExecutionScope,
        conversation_id: &str,
        config: &HistoryConfig,
        filters: &HistoryFilters,
        current_message_id: Option<&str>,
    ) -> Result<String, DbError> {
        let mut messages = self.history(scope, conversation_id, config, filters)?;
        if let Some(current) = current_message_id {
            messages.retain(|m| m.id != current);
        }

        let mut omitted = 0usize;
        if let Some(budget) = config.max_output_tokens {
            while messages.len() > 1 && total_tokens(&messages) > budget {
                messages.remove(0);
                omitted += 1;
            }
        }

        let mut lines = Vec::with_capacity(messages.len() + 1);
        if omitted > 0 {
            lines.push(format!(
                "system: \"\"\"[earlier messages truncated: {omitted} omitted]\"\"\""
            ));
        }
        for msg in &messages {
            lines.push(format!("{}: \"\"\"{}\"\"\"", role_label(msg), msg.content));
        }
        Ok(lines.join("\n"))
    }

    /// Artifacts visible through the same scoping as the shaped history: an
    /// artifact survives iff some surviving message references its task.
    ///
    /// Errors yield an empty set by contract.
    pub fn scoped_artifacts(
        &self,
        scope: &ExecutionScope,
        conversation_id: &str,
        config: &HistoryConfig,
        filters: &HistoryFilters,
    ) -> Vec<Artifact> {
        match self.scoped_artifacts_inner(scope, conversation_id, config, filters) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!(error = %e, conversation = conversation_id, "artifact scoping failed, returning empty set");
                Vec::new()
            }
        }
    }

    fn scoped_artifacts_inner(
        &self,
        scope: &ExecutionScope,
        conversation_id: &str,
        config: &HistoryConfig,
        filters: &HistoryFilters,
    ) -> Result<Vec<Artifact>, DbError> {
        let messages = self.history(scope, conversation_id, config, filters)?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut task_ids: Vec<String> = messages
            .iter()
            .flat_map(|m| [m.task_id.clone(), m.a2a_task_id.clone()])
            .flatten()
            .collect();
        task_ids.sort();
        task_ids.dedup();

        let mut conn = self.pool.get()?;
        Artifact::list_for_tasks(&mut conn, &scope.tenant_id, &scope.project_id, &task_ids)
    }
}

fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// The prompt-facing label for one message.
fn role_label(msg: &Message) -> String {
    let from = msg
        .from_agent_id
        .as_deref()
        .or(msg.from_external_agent_id.as_deref());
    let to = msg
        .to_agent_id
        .as_deref()
        .or(msg.to_external_agent_id.as_deref());

    match (msg.role.as_str(), from, to) {
        ("user", _, _) => "user".to_string(),
        (_, Some(from), Some(to)) => format!("{from} to {to}"),
        (_, Some(from), None) => format!("{from} to User"),
        (role, _, _) => role.to_string(),
    }
}
