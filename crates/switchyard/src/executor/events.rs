//! Events a turn emits while running.
//!
//! The executor publishes these into a per-task broadcast channel; the SSE
//! bridge (and `tasks/resubscribe`) consume them. The channel is the only
//! coupling between execution and transport.

use crate::a2a::{ArtifactUpdateEvent, StatusUpdateEvent, WireMessage, WireTask};

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// Initial snapshot: the task has started working.
    Task(WireTask),
    /// Intermediate state change.
    Status(StatusUpdateEvent),
    /// An artifact was attached to the task.
    Artifact(ArtifactUpdateEvent),
    /// The agent's reply. Emitted after artifacts so clients can resolve
    /// referenced artifact ids.
    Message(WireMessage),
    /// Terminal task snapshot; the stream closes after this.
    Final(WireTask),
    /// The turn failed; carries the detail the bridge turns into a JSON-RPC
    /// error frame.
    Error(String),
}

impl ExecutorEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorEvent::Final(_) | ExecutorEvent::Error(_))
    }
}
