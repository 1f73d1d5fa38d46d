//! History shaping rules.

use serde::{Deserialize, Serialize};

use crate::database::models::{Message, MessageType, MessageVisibility};

/// How much of a conversation an agent sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    None,
    #[default]
    Full,
    Scoped,
}

/// Per-agent history configuration, stored on the agent row as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub mode: HistoryMode,
    pub limit: usize,
    pub include_internal: bool,
    pub message_types: Vec<MessageType>,
    pub max_output_tokens: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            mode: HistoryMode::Full,
            limit: 50,
            include_internal: true,
            message_types: vec![MessageType::Chat],
            max_output_tokens: Some(4_000),
        }
    }
}

impl HistoryConfig {
    /// Decode an agent's stored config, falling back to defaults on absence
    /// or malformed JSON.
    pub fn from_json(raw: Option<&str>) -> HistoryConfig {
        raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
    }
}

/// Scoped-mode filters. When both are set they must BOTH match (conjunction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilters {
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Apply the shaping rules to a conversation's full message list (already in
/// creation order). `limit` keeps the newest messages after filtering.
pub fn shape_history(
    messages: Vec<Message>,
    config: &HistoryConfig,
    filters: &HistoryFilters,
) -> Vec<Message> {
    if config.mode == HistoryMode::None {
        return Vec::new();
    }

    let mut kept: Vec<Message> = messages
        .into_iter()
        .filter(|m| match config.mode {
            HistoryMode::None => false,
            HistoryMode::Full => passes_full(m, config),
            HistoryMode::Scoped => passes_scoped(m, config, filters),
        })
        .collect();

    if kept.len() > config.limit {
        kept.drain(..kept.len() - config.limit);
    }
    kept
}

fn passes_visibility(msg: &Message, config: &HistoryConfig) -> bool {
    match msg.visibility() {
        Some(MessageVisibility::Internal) => config.include_internal,
        _ => true,
    }
}

fn passes_full(msg: &Message, config: &HistoryConfig) -> bool {
    let type_ok = match msg.message_type() {
        Some(mt) => config.message_types.contains(&mt),
        None => false,
    };
    type_ok && passes_visibility(msg, config)
}

fn passes_scoped(msg: &Message, config: &HistoryConfig, filters: &HistoryFilters) -> bool {
    // User messages always survive scoping.
    if msg.role == "user" {
        return true;
    }
    if !passes_visibility(msg, config) {
        return false;
    }

    let agent_ok = filters.agent_id.as_deref().map(|agent| {
        let user_facing_from = msg.visibility() == Some(MessageVisibility::UserFacing)
            && msg.from_agent_id.as_deref() == Some(agent);
        let endpoint = msg.from_agent_id.as_deref() == Some(agent)
            || msg.to_agent_id.as_deref() == Some(agent)
            || msg.from_external_agent_id.as_deref() == Some(agent)
            || msg.to_external_agent_id.as_deref() == Some(agent);
        user_facing_from || endpoint
    });
    let task_ok = filters.task_id.as_deref().map(|task| {
        msg.task_id.as_deref() == Some(task) || msg.a2a_task_id.as_deref() == Some(task)
    });

    match (agent_ok, task_ok) {
        (Some(a), Some(t)) => a && t,
        (Some(a), None) => a,
        (None, Some(t)) => t,
        // Scoped mode with no filters degenerates to "everything visible".
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewMessage;

    fn msg(role: &str, mt: MessageType, vis: MessageVisibility) -> Message {
        let new = NewMessage::new("t", "p", "c", role, "content", mt, vis);
        Message {
            pk: 0,
            tenant_id: new.tenant_id,
            project_id: new.project_id,
            conversation_id: new.conversation_id,
            id: new.id,
            role: new.role,
            content: new.content,
            message_type: new.message_type,
            visibility: new.visibility,
            from_agent_id: None,
            to_agent_id: None,
            from_external_agent_id: None,
            to_external_agent_id: None,
            task_id: None,
            a2a_task_id: None,
            metadata_json: None,
            created_at: new.created_at,
        }
    }

    #[test]
    fn full_mode_filters_types_and_visibility() {
        let messages = vec![
            msg("user", MessageType::Chat, MessageVisibility::UserFacing),
            msg("agent", MessageType::A2aRequest, MessageVisibility::Internal),
            msg("agent", MessageType::Chat, MessageVisibility::Internal),
        ];
        let config = HistoryConfig {
            include_internal: false,
            ..HistoryConfig::default()
        };
        let shaped = shape_history(messages, &config, &HistoryFilters::default());
        // Only the user-facing chat message survives: the a2a request is the
        // wrong type, the internal chat is filtered by visibility.
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].role, "user");
    }

    #[test]
    fn limit_keeps_newest() {
        let mut messages = Vec::new();
        for i in 0..10 {
            let mut m = msg("user", MessageType::Chat, MessageVisibility::UserFacing);
            m.content = format!("m{i}");
            messages.push(m);
        }
        let config = HistoryConfig {
            limit: 3,
            ..HistoryConfig::default()
        };
        let shaped = shape_history(messages, &config, &HistoryFilters::default());
        let contents: Vec<&str> = shaped.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn scoped_task_filter_matches_either_task_field() {
        let mut direct = msg("agent", MessageType::Chat, MessageVisibility::UserFacing);
        direct.task_id = Some("t9".to_string());
        let mut via_a2a = msg("agent", MessageType::A2aResponse, MessageVisibility::Internal);
        via_a2a.a2a_task_id = Some("t9".to_string());
        via_a2a.from_agent_id = Some("a".to_string());
        via_a2a.to_agent_id = Some("b".to_string());
        let mut other = msg("agent", MessageType::Chat, MessageVisibility::UserFacing);
        other.task_id = Some("t1".to_string());

        let config = HistoryConfig {
            mode: HistoryMode::Scoped,
            ..HistoryConfig::default()
        };
        let filters = HistoryFilters {
            agent_id: None,
            task_id: Some("t9".to_string()),
        };
        let shaped = shape_history(vec![direct, via_a2a, other], &config, &filters);
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn config_from_json_defaults_on_garbage() {
        assert_eq!(HistoryConfig::from_json(None), HistoryConfig::default());
        assert_eq!(HistoryConfig::from_json(Some("not json")), HistoryConfig::default());

        let custom = HistoryConfig::from_json(Some(r#"{"mode":"scoped","limit":5}"#));
        assert_eq!(custom.mode, HistoryMode::Scoped);
        assert_eq!(custom.limit, 5);
        // Unspecified fields fall back to defaults.
        assert!(custom.include_internal);
    }
}
