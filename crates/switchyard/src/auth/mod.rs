//! Request authentication.
//!
//! Maps an incoming bearer token to an [`ExecutionScope`] or rejects it.
//! Three modes, evaluated in order:
//!
//! 1. **Bypass secret** — the token equals the configured shared secret and
//!    the caller names its scope via `x-inkeep-tenant-id` /
//!    `x-inkeep-project-id` / `x-inkeep-graph-id` headers.
//! 2. **API key** — `sk_<publicId>.<secret>`, validated against the stored
//!    SHA-256 hash in constant time.
//! 3. **Dev fallback** — in `development`/`test` environments a missing or
//!    malformed header resolves to the dummy scope. Never in production.
//!
//! Failures are uniformly [`AuthError::Unauthorized`]; the presented token is
//! never echoed or logged.

mod key;

pub use key::{GeneratedKey, generate_key, hash_key, parse_key, verify_key};

use std::collections::HashMap;

use crate::config::{AuthConfig, Environment};
use crate::database::models::ApiKey;
use crate::database::{DbError, DbPool};
use crate::scope::ExecutionScope;

pub const TENANT_HEADER: &str = "x-inkeep-tenant-id";
pub const PROJECT_HEADER: &str = "x-inkeep-project-id";
pub const GRAPH_HEADER: &str = "x-inkeep-graph-id";
pub const AGENT_HEADER: &str = "x-inkeep-agent-id";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Deliberately generic: nothing about *why* authentication failed leaks
    /// to the caller.
    #[error("unauthorized")]
    Unauthorized,

    #[error("ledger error during authentication")]
    Ledger(#[from] DbError),
}

/// Resolves bearer tokens into execution scopes.
pub struct AuthResolver {
    pool: DbPool,
    config: AuthConfig,
    environment: Environment,
}

impl AuthResolver {
    pub fn new(pool: DbPool, config: AuthConfig, environment: Environment) -> Self {
        Self {
            pool,
            config,
            environment,
        }
    }

    /// Resolve an `Authorization` header value (may be absent) plus the
    /// scope-hint headers into an [`ExecutionScope`].
    ///
    /// The dev/test fallback covers only a missing or malformed header: a
    /// token matching the `sk_` wire format must stand on its own in every
    /// environment, so an expired or forged key is never waved through.
    pub fn resolve(
        &self,
        auth_header: Option<&str>,
        headers: &HashMap<String, String>,
    ) -> Result<ExecutionScope, AuthError> {
        let token = auth_header.and_then(|h| h.strip_prefix("Bearer ")).map(str::trim);

        match token {
            Some(token) if !token.is_empty() => {
                if self.is_bypass(token) {
                    return self.scope_from_headers(headers);
                }
                if parse_key(token).is_some() {
                    return self.resolve_api_key(token);
                }
                if self.environment.allows_dev_fallback() {
                    return Ok(Self::fallback_scope(headers));
                }
                Err(AuthError::Unauthorized)
            }
            _ if self.environment.allows_dev_fallback() => Ok(Self::fallback_scope(headers)),
            _ => Err(AuthError::Unauthorized),
        }
    }

    fn is_bypass(&self, token: &str) -> bool {
        use subtle::ConstantTimeEq;
        match &self.config.bypass_secret {
            Some(secret) if !secret.is_empty() && secret.len() == token.len() => {
                secret.as_bytes().ct_eq(token.as_bytes()).into()
            }
            _ => false,
        }
    }

    fn scope_from_headers(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<ExecutionScope, AuthError> {
        let tenant = headers.get(TENANT_HEADER).filter(|s| !s.is_empty());
        let project = headers.get(PROJECT_HEADER).filter(|s| !s.is_empty());
        let graph = headers.get(GRAPH_HEADER).filter(|s| !s.is_empty());

        match (tenant, project, graph) {
            (Some(t), Some(p), Some(g)) => {
                let mut scope = ExecutionScope::new(t.clone(), p.clone(), g.clone());
                if let Some(agent) = headers.get(AGENT_HEADER).filter(|s| !s.is_empty()) {
                    scope = scope.with_agent(agent.clone());
                }
                Ok(scope)
            }
            _ => Err(AuthError::Unauthorized),
        }
    }

    fn resolve_api_key(&self, token: &str) -> Result<ExecutionScope, AuthError> {
        let (public_id, _) = parse_key(token).ok_or(AuthError::Unauthorized)?;

        let mut conn = self.pool.get().map_err(DbError::from)?;
        let row = ApiKey::find_by_public_id(&mut conn, public_id)?
            .ok_or(AuthError::Unauthorized)?;

        if !verify_key(token, &row.key_hash) {
            return Err(AuthError::Unauthorized);
        }

        if let Some(expires_at) = &row.expires_at {
            let expired = chrono::DateTime::parse_from_rfc3339(expires_at)
                .map(|t| t < chrono::Utc::now())
                .unwrap_or(true);
            if expired {
                return Err(AuthError::Unauthorized);
            }
        }

        ApiKey::touch(&mut conn, &row.public_id);

        Ok(ExecutionScope::new(
            row.tenant_id,
            row.project_id,
            row.graph_id,
        ))
    }

    /// The development/test scope, honoring any hint headers present.
    fn fallback_scope(headers: &HashMap<String, String>) -> ExecutionScope {
        let base = ExecutionScope::dev_fallback();
        let tenant = headers
            .get(TENANT_HEADER)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or(base.tenant_id);
        let project = headers
            .get(PROJECT_HEADER)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or(base.project_id);
        let graph = headers
            .get(GRAPH_HEADER)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or(base.graph_id);
        ExecutionScope::new(tenant, project, graph)
    }
}
