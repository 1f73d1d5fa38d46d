//! Tool sessions: the per-graph-execution scratchpad.
//!
//! One session id spans a whole graph execution — the entry agent mints it
//! and every agent reached by transfer or delegation within the same user
//! turn reuses it, so later turns can reference earlier tool results.
//!
//! Sessions live 5 minutes from creation; a background sweep evicts expired
//! entries every 60 seconds. The map is not authoritative state and may be
//! reconstructed at any time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use serde_json::Value;

use crate::scope::ExecutionScope;

const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One recorded tool call.
#[derive(Debug, Clone)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
    pub timestamp: String,
}

#[derive(Debug)]
struct ToolSession {
    #[allow(dead_code)]
    scope: ExecutionScope,
    #[allow(dead_code)]
    context_id: String,
    task_ids: Vec<String>,
    results: HashMap<String, ToolResultRecord>,
    created_at: Instant,
}

/// In-process registry of tool sessions.
#[derive(Clone)]
pub struct ToolSessionManager {
    sessions: Arc<Mutex<HashMap<String, ToolSession>>>,
}

impl ToolSessionManager {
    /// Create the manager and spawn the eviction sweep.
    pub fn new() -> Self {
        let manager = Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        };
        let weak = Arc::downgrade(&manager.sessions);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(sessions) = weak.upgrade() else {
                    break;
                };
                if let Ok(mut map) = sessions.lock() {
                    let before = map.len();
                    map.retain(|_, s| s.created_at.elapsed() < SESSION_TTL);
                    let evicted = before - map.len();
                    if evicted > 0 {
                        tracing::debug!(evicted, "tool session sweep");
                    }
                }
            }
        });
        manager
    }

    /// Construction without the sweep task, for synchronous tests.
    #[doc(hidden)]
    pub fn new_unswept() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Idempotent create. A second call with the same id keeps the existing
    /// entry (and its recorded results) and just associates the task id.
    pub fn ensure_graph_session(
        &self,
        session_id: &str,
        scope: &ExecutionScope,
        context_id: &str,
        task_id: &str,
    ) -> String {
        if let Ok(mut map) = self.sessions.lock() {
            let entry = map.entry(session_id.to_string()).or_insert_with(|| ToolSession {
                scope: scope.clone(),
                context_id: context_id.to_string(),
                task_ids: Vec::new(),
                results: HashMap::new(),
                created_at: Instant::now(),
            });
            if !entry.task_ids.iter().any(|t| t == task_id) {
                entry.task_ids.push(task_id.to_string());
            }
        }
        session_id.to_string()
    }

    /// Record a tool result. Unknown sessions are a warn-and-drop, not an
    /// error: the session may have expired mid-turn.
    pub fn record_tool_result(&self, session_id: &str, record: ToolResultRecord) {
        if let Ok(mut map) = self.sessions.lock() {
            match map.get_mut(session_id) {
                Some(session) => {
                    session.results.insert(record.tool_call_id.clone(), record);
                }
                None => {
                    tracing::warn!(session = session_id, "tool result for unknown session dropped");
                }
            }
        }
    }

    pub fn get_tool_result(&self, session_id: &str, tool_call_id: &str) -> Option<ToolResultRecord> {
        self.sessions
            .lock()
            .ok()
            .and_then(|map| map.get(session_id).and_then(|s| s.results.get(tool_call_id).cloned()))
    }

    pub fn end_session(&self, session_id: &str) {
        if let Ok(mut map) = self.sessions.lock() {
            map.remove(session_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for ToolSessionManager {
    fn default() -> Self {
        Self::new_unswept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(call_id: &str) -> ToolResultRecord {
        ToolResultRecord {
            tool_call_id: call_id.to_string(),
            tool_name: "search".to_string(),
            args: serde_json::json!({"q": "x"}),
            result: serde_json::json!({"hits": 1}),
            timestamp: crate::database::now_rfc3339(),
        }
    }

    #[test]
    fn ensure_is_idempotent_and_preserves_results() {
        let mgr = ToolSessionManager::new_unswept();
        let scope = ExecutionScope::new("t", "p", "g");

        mgr.ensure_graph_session("s1", &scope, "c1", "task1");
        mgr.record_tool_result("s1", record("call1"));

        // Re-ensuring with a different task keeps the entry and its contents.
        mgr.ensure_graph_session("s1", &scope, "c1", "task2");
        assert_eq!(mgr.session_count(), 1);
        assert!(mgr.get_tool_result("s1", "call1").is_some());
    }

    #[test]
    fn unknown_session_drops_record() {
        let mgr = ToolSessionManager::new_unswept();
        mgr.record_tool_result("nope", record("call1"));
        assert!(mgr.get_tool_result("nope", "call1").is_none());
    }

    #[test]
    fn end_session_removes_entry() {
        let mgr = ToolSessionManager::new_unswept();
        let scope = ExecutionScope::new("t", "p", "g");
        mgr.ensure_graph_session("s1", &scope, "c1", "task1");
        mgr.end_session("s1");
        assert_eq!(mgr.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_expired_sessions() {
        let mgr = ToolSessionManager::new();
        let scope = ExecutionScope::new("t", "p", "g");
        mgr.ensure_graph_session("s1", &scope, "c1", "task1");
        assert_eq!(mgr.session_count(), 1);

        // Past the TTL the next sweep tick evicts the session.
        tokio::time::advance(SESSION_TTL + SWEEP_INTERVAL).await;
        tokio::task::yield_now().await;

        assert_eq!(mgr.session_count(), 0);
    }
}
