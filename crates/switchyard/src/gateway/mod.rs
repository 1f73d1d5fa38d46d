//! HTTP gateway: router assembly, shared state, and server startup.

mod auth;
mod management;
mod problem;
mod rpc;
mod routes;
mod sse;

pub use problem::{FieldError, Problem};

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::{Router, middleware};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::AgentRegistry;
use crate::auth::AuthResolver;
use crate::config::RuntimeConfig;
use crate::credentials::{CredentialStoreRegistry, EnvCredentialStore, MemoryCredentialStore};
use crate::database::DbPool;
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::llm::{ModelProvider, OpenAiCompatibleProvider};
use crate::tools::{FunctionSandboxPool, ToolSessionManager};

/// Everything the handlers share.
pub struct AppState {
    pub pool: DbPool,
    pub config: RuntimeConfig,
    pub executor: Arc<TaskExecutor>,
    pub registry: AgentRegistry,
    pub resolver: AuthResolver,
    pub credentials: CredentialStoreRegistry,
    pub base_url: String,
}

impl AppState {
    /// Assemble the state from its parts. The provider is injected so tests
    /// can run the full HTTP surface against a scripted model.
    pub fn new(
        config: RuntimeConfig,
        pool: DbPool,
        provider: Arc<dyn ModelProvider>,
    ) -> Arc<Self> {
        let mut credentials = CredentialStoreRegistry::new();
        credentials.register(Arc::new(MemoryCredentialStore::new("memory-default")));
        credentials.register(Arc::new(EnvCredentialStore::new("env-default")));

        let sandbox = Arc::new(FunctionSandboxPool::new(config.sandbox.clone()));
        let sessions = ToolSessionManager::new();
        let executor = Arc::new(TaskExecutor::new(
            pool.clone(),
            provider,
            sandbox,
            sessions,
            credentials.clone(),
            ExecutorConfig {
                default_model: config.provider.default_model.clone(),
                request_deadline: Duration::from_secs(config.server.request_deadline_secs),
                max_tool_iterations: 8,
            },
        ));

        let resolver = AuthResolver::new(pool.clone(), config.auth.clone(), config.environment);
        let base_url = format!("http://{}", config.server.bind);

        Arc::new(Self {
            registry: AgentRegistry::new(pool.clone()),
            pool,
            executor,
            resolver,
            credentials,
            base_url,
            config,
        })
    }
}

/// Build the full router over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/agents/{graph_id}/a2a", post(rpc::a2a_handler))
        .route(
            "/agents/{graph_id}/.well-known/agent.json",
            get(routes::agent_card),
        )
        .route("/v1/chat", post(routes::chat))
        .route("/api/chat/stream", get(routes::chat_stream))
        .route("/project-full/{project_id}", put(management::put_project_full))
        .route(
            "/api-keys",
            post(management::create_api_key).get(management::list_api_keys),
        )
        .route(
            "/api-keys/{id}",
            get(management::get_api_key).delete(management::delete_api_key),
        )
        .route("/credentials", post(management::create_credential))
        .route("/credentials/{id}", axum::routing::delete(management::delete_credential))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(routes::health))
        .route("/openapi.json", get(routes::openapi))
        .route("/docs", get(routes::docs));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Boot the gateway: open the ledger, wire the provider, bind, serve.
/// Blocks until the server shuts down.
pub async fn serve(config: RuntimeConfig) -> Result<(), String> {
    let pool = if config.server.database_path == ":memory:" {
        crate::database::init_in_memory().map_err(|e| e.to_string())?
    } else {
        crate::database::init(std::path::Path::new(&config.server.database_path))
            .map_err(|e| e.to_string())?
    };

    let api_key = std::env::var(&config.provider.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            env = %config.provider.api_key_env,
            "model provider API key not set; provider calls will likely fail"
        );
    }
    let provider: Arc<dyn ModelProvider> = Arc::new(
        OpenAiCompatibleProvider::new(
            config.provider.base_url.clone(),
            api_key,
            Duration::from_secs(config.provider.request_timeout_secs),
        )
        .map_err(|e| e.to_string())?,
    );

    let bind = config.server.bind.clone();
    let state = AppState::new(config, pool, provider);
    let app = router(state);

    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| format!("could not bind {bind}: {e}"))?;
    tracing::info!(addr = %bind, "switchyard gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {e}"))
}
