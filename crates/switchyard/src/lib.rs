//! Switchyard — a multi-agent orchestration runtime.
//!
//! A client submits a natural-language request to a named *graph*; the
//! runtime routes it to an entry agent which may answer directly, transfer
//! the conversation to a peer agent, or delegate a sub-task to another
//! agent. Agents invoke tools (remote MCP servers or sandboxed user code)
//! and stream replies plus structured artifacts back over the A2A JSON-RPC
//! protocol.
//!
//! Component map:
//! - [`database`] — tenant-scoped relational ledger (conversations, tasks,
//!   messages, artifacts, configuration rows, API keys)
//! - [`auth`] — bearer-token resolution into an [`scope::ExecutionScope`]
//! - [`agents`] — agent registry producing discoverable cards + task handlers
//! - [`conversations`] — history shaping and artifact scoping for prompts
//! - [`tools`] — tool sessions, the function sandbox pool, remote MCP calls
//! - [`executor`] — one agent turn: prompt, model loop, transfer/delegate
//! - [`a2a`] — protocol wire types
//! - [`gateway`] — the HTTP surface and the SSE streaming bridge

pub mod a2a;
pub mod agents;
pub mod auth;
pub mod config;
pub mod context;
pub mod conversations;
pub mod credentials;
pub mod database;
pub mod executor;
pub mod gateway;
pub mod llm;
pub mod scope;
pub mod tools;

pub use scope::ExecutionScope;

/// An opaque short id: a v4 UUID without hyphens, truncated to 16 chars.
/// Unique within the scopes the ledger cares about and friendlier in logs
/// and URLs than a full UUID.
pub fn short_id() -> String {
    let mut s = uuid::Uuid::new_v4().simple().to_string();
    s.truncate(16);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_are_short_and_distinct() {
        let a = short_id();
        let b = short_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
