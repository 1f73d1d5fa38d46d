//! Gateway auth middleware.
//!
//! Validates the bearer token via the auth resolver and attaches the
//! resolved [`ExecutionScope`] to the request as an extension. Handlers read
//! it with `Extension<ExecutionScope>`; nothing downstream re-derives tenant
//! identity from headers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::scope::ExecutionScope;

use super::AppState;
use super::problem::Problem;

const SCOPE_HEADERS: [&str; 4] = [
    crate::auth::TENANT_HEADER,
    crate::auth::PROJECT_HEADER,
    crate::auth::GRAPH_HEADER,
    crate::auth::AGENT_HEADER,
];

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut hint_headers = HashMap::new();
    for name in SCOPE_HEADERS {
        if let Some(value) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            hint_headers.insert(name.to_string(), value.to_string());
        }
    }

    match state.resolver.resolve(auth_header.as_deref(), &hint_headers) {
        Ok(scope) => {
            request.extensions_mut().insert::<ExecutionScope>(scope);
            next.run(request).await
        }
        Err(crate::auth::AuthError::Unauthorized) => Problem::unauthorized().into_response(),
        Err(e) => {
            let correlation_id = crate::short_id();
            tracing::error!(correlation = %correlation_id, error = %e, "auth resolution failed");
            Problem::internal(&correlation_id).into_response()
        }
    }
}
