use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The tool's output as a JSON value (string output is wrapped verbatim).
    pub result: Value,
    /// Whether the tool considered the execution successful.
    pub success: bool,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            success: true,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: Value::String(message.into()),
            success: false,
        }
    }

    /// Rendering handed back to the model as the tool-role message body.
    pub fn to_model_payload(&self) -> String {
        serde_json::json!({
            "success": self.success,
            "result": self.result,
        })
        .to_string()
    }
}

/// A capability an agent can invoke during a turn.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` binding set.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier exposed to the model.
    fn name(&self) -> &str;

    /// Human-readable description used in the model's tool specs.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. Infrastructure failures are `Err`; a tool that ran
    /// and reported failure is `Ok(ToolOutcome { success: false, .. })`.
    async fn execute(&self, args: Value) -> Result<ToolOutcome, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_payload_shape() {
        let ok = ToolOutcome::ok(serde_json::json!({"rows": 3}));
        let payload: Value = serde_json::from_str(&ok.to_model_payload()).unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["result"]["rows"], 3);

        let err = ToolOutcome::err("boom");
        let payload: Value = serde_json::from_str(&err.to_model_payload()).unwrap();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["result"], "boom");
    }
}
