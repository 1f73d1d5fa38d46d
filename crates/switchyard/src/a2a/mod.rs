//! A2A protocol wire types.
//!
//! JSON-RPC 2.0 envelopes plus the task/message/artifact shapes exchanged
//! with clients and peer agents. The gateway owns transport; the executor
//! produces these values.

mod types;

pub use types::{
    ArtifactUpdateEvent, JsonRpcError, JsonRpcRequest, JsonRpcResponse, MessageSendConfiguration,
    MessageSendParams, SendResult, SendTaskContext, SendTaskRef, StatusUpdateEvent, TaskIdParams,
    WireArtifact, WireMessage, WirePart, WireTask, WireTaskStatus, effective_context_id,
    error_codes,
};
