use serde::{Deserialize, Serialize};

// ─── Environment ──────────────────────────────────────────────────────────────

/// Deployment environment. Only `development` and `test` permit the fallback
/// execution scope; `production` requires real credentials on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Environment> {
        match s {
            "development" => Some(Environment::Development),
            "test" => Some(Environment::Test),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn allows_dev_fallback(&self) -> bool {
        matches!(self, Environment::Development | Environment::Test)
    }
}

// ─── RuntimeConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub provider: ProviderConfig,
    pub sandbox: SandboxConfig,
}

// ─── ServerConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:3081`.
    pub bind: String,
    /// Ledger database path. `:memory:` for an ephemeral run.
    pub database_path: String,
    /// Whole-turn deadline for A2A calls in seconds.
    pub request_deadline_secs: u64,
    /// Whether `message/stream` / `tasks/resubscribe` are served. When false
    /// streaming requests are rejected with the capability error code.
    pub streaming_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3081".to_string(),
            database_path: "switchyard.db".to_string(),
            request_deadline_secs: 120,
            streaming_enabled: true,
        }
    }
}

// ─── AuthConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret that, when presented as the bearer token, lets the
    /// caller name its own scope via `x-inkeep-*` headers. Unset disables
    /// bypass mode entirely.
    pub bypass_secret: Option<String>,
}

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible chat-completions base URL.
    pub base_url: String,
    /// Name of the environment variable holding the provider API key. The
    /// key itself never appears in config files.
    pub api_key_env: String,
    /// Model used when neither graph nor agent pins one.
    pub default_model: String,
    /// Per-model-call timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 60,
        }
    }
}

// ─── SandboxConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Runtime binary for function tools.
    pub node_binary: String,
    /// Package manager used to install declared dependencies.
    pub npm_binary: String,
    /// Default wall-clock timeout per execution in seconds.
    pub timeout_secs: u64,
    /// Timeout for dependency installation in seconds.
    pub install_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            npm_binary: "npm".to_string(),
            timeout_secs: 30,
            install_timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_fallback_gate() {
        assert!(Environment::Development.allows_dev_fallback());
        assert!(Environment::Test.allows_dev_fallback());
        assert!(!Environment::Production.allows_dev_fallback());
    }

    #[test]
    fn environment_parse() {
        assert_eq!(Environment::parse("production"), Some(Environment::Production));
        assert_eq!(Environment::parse("staging"), None);
    }
}
