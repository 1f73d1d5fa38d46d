//! Runtime configuration.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `switchyard.toml`:
//! ```toml
//! environment = "development"
//!
//! [server]
//! bind = "127.0.0.1:3081"
//!
//! [auth]
//! bypass_secret = "local-dev-secret"
//!
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! default_model = "gpt-4o-mini"
//! ```

mod schema;

pub use schema::{
    AuthConfig, Environment, ProviderConfig, RuntimeConfig, SandboxConfig, ServerConfig,
};

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. `SWITCHYARD_ENV` overrides the environment either way.
pub fn load(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let raw = std::fs::read_to_string(p)?;
            toml::from_str(&raw)?
        }
        Some(p) => {
            tracing::warn!(path = %p.display(), "config file not found, using defaults");
            RuntimeConfig::default()
        }
        None => RuntimeConfig::default(),
    };

    if let Ok(env) = std::env::var("SWITCHYARD_ENV") {
        if let Some(parsed) = Environment::parse(&env) {
            config.environment = parsed;
        } else {
            tracing::warn!(value = %env, "unrecognized SWITCHYARD_ENV, keeping configured environment");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            environment = "production"

            [server]
            bind = "0.0.0.0:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.request_deadline_secs, 120);
        assert!(config.auth.bypass_secret.is_none());
        assert_eq!(config.sandbox.timeout_secs, 30);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert!(config.server.streaming_enabled);
    }
}
