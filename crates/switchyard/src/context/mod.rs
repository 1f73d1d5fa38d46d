//! Context variable resolution.
//!
//! A graph's `ContextConfig` declares variables fetched from caller-supplied
//! endpoints: `initialization` variables fire once when the conversation is
//! created, `invocation` variables fire on every turn. Fetch failures fall
//! back to the variable's default; the resolved set is rendered into the
//! system prompt as a JSON block.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::database::models::{ContextVariable, FetchSpec, VariableTrigger};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves context variables by firing their fetch specs.
#[derive(Clone)]
pub struct ContextResolver {
    client: reqwest::Client,
}

impl ContextResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Resolve every variable whose trigger applies this turn.
    /// `thread_created` selects whether `initialization` variables fire.
    pub async fn resolve(
        &self,
        variables: &[ContextVariable],
        thread_created: bool,
    ) -> BTreeMap<String, Value> {
        let mut resolved = BTreeMap::new();
        for variable in variables {
            let fires = match variable.trigger {
                VariableTrigger::Initialization => thread_created,
                VariableTrigger::Invocation => true,
            };
            if !fires {
                continue;
            }

            let value = match &variable.fetch {
                Some(spec) => match self.fetch(spec).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(variable = %variable.name, error = %e, "context fetch failed, using default");
                        variable.default_value.clone().unwrap_or(Value::Null)
                    }
                },
                None => variable.default_value.clone().unwrap_or(Value::Null),
            };
            resolved.insert(variable.name.clone(), value);
        }
        resolved
    }

    async fn fetch(&self, spec: &FetchSpec) -> Result<Value, String> {
        let method = spec.method.as_deref().unwrap_or("GET").to_uppercase();
        let mut req = match method.as_str() {
            "POST" => self.client.post(&spec.url),
            "PUT" => self.client.put(&spec.url),
            _ => self.client.get(&spec.url),
        };
        req = req.timeout(FETCH_TIMEOUT);

        if let Some(Value::Object(headers)) = &spec.headers {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    req = req.header(name, v);
                }
            }
        }
        if let Some(body) = &spec.body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("fetch returned {status}"));
        }
        resp.json::<Value>().await.map_err(|e| e.to_string())
    }
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Render resolved variables as a prompt block. Empty input renders nothing.
pub fn render_context_block(resolved: &BTreeMap<String, Value>) -> String {
    if resolved.is_empty() {
        return String::new();
    }
    let json = serde_json::to_string_pretty(resolved).unwrap_or_else(|_| "{}".to_string());
    format!("\n\nContext:\n{json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(name: &str, trigger: VariableTrigger, default: Option<Value>) -> ContextVariable {
        ContextVariable {
            name: name.to_string(),
            trigger,
            fetch: None,
            default_value: default,
        }
    }

    #[tokio::test]
    async fn initialization_variables_fire_only_on_creation() {
        let resolver = ContextResolver::new();
        let vars = vec![
            variable(
                "plan",
                VariableTrigger::Initialization,
                Some(Value::String("free".into())),
            ),
            variable(
                "turn",
                VariableTrigger::Invocation,
                Some(Value::String("every".into())),
            ),
        ];

        let first = resolver.resolve(&vars, true).await;
        assert_eq!(first.len(), 2);

        let later = resolver.resolve(&vars, false).await;
        assert_eq!(later.len(), 1);
        assert!(later.contains_key("turn"));
    }

    #[tokio::test]
    async fn failed_fetch_uses_default() {
        let resolver = ContextResolver::new();
        let vars = vec![ContextVariable {
            name: "plan".to_string(),
            trigger: VariableTrigger::Invocation,
            fetch: Some(FetchSpec {
                // Nothing listens here; the fetch fails fast.
                url: "http://127.0.0.1:1/unreachable".to_string(),
                method: None,
                headers: None,
                body: None,
            }),
            default_value: Some(Value::String("fallback".into())),
        }];

        let resolved = resolver.resolve(&vars, false).await;
        assert_eq!(resolved["plan"], "fallback");
    }

    #[test]
    fn context_block_rendering() {
        assert!(render_context_block(&BTreeMap::new()).is_empty());

        let resolved = BTreeMap::from([("plan".to_string(), Value::String("pro".into()))]);
        let block = render_context_block(&resolved);
        assert!(block.starts_with("\n\nContext:"));
        assert!(block.contains("\"plan\": \"pro\""));
    }
}
