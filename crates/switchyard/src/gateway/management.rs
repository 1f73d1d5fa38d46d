//! Minimal management surface.
//!
//! The runtime's E2E surface needs working configuration writes: the
//! project-full upsert (one document carrying graphs, agents, relations, and
//! tools), API keys, and credential references. Duplicate ids are 409,
//! duplicate relations 422, cross-tenant reads 404.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::generate_key;
use crate::database::models::{
    AgentDefinition, AgentGraph, AgentRelation, ApiKey, CredentialReference, NewAgentDefinition,
    NewAgentGraph, NewAgentRelation, NewCredentialReference, NewProject, NewTool, Project,
    RelationType, Tool, ToolConfig,
};
use crate::scope::ExecutionScope;

use super::AppState;
use super::problem::{
    Problem, clamp_limit, decode_body, from_db_error, is_unique_violation, validation_failure,
};

// ─── project-full upsert ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFullBody {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    models: Option<Value>,
    #[serde(default)]
    graphs: Vec<GraphBody>,
    #[serde(default)]
    tools: Vec<ToolBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    id: String,
    name: String,
    default_agent_id: String,
    #[serde(default)]
    models: Option<Value>,
    #[serde(default)]
    stop_when: Option<Value>,
    #[serde(default)]
    agents: Vec<AgentBody>,
    #[serde(default)]
    relations: Vec<RelationBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentBody {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    prompt: String,
    #[serde(default)]
    tool_ids: Vec<String>,
    #[serde(default)]
    conversation_history_config: Option<Value>,
    #[serde(default)]
    models: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationBody {
    source_agent_id: String,
    #[serde(default)]
    target_agent_id: Option<String>,
    #[serde(default)]
    external_agent: Option<ExternalAgentBody>,
    relation_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalAgentBody {
    url: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolBody {
    id: String,
    name: String,
    config: ToolConfig,
    #[serde(default)]
    credential_reference_id: Option<String>,
}

/// `PUT /project-full/{id}` — an upsert: 201 on first write, 200 on replace.
pub async fn put_project_full(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Extension(scope): Extension<ExecutionScope>,
    Json(body): Json<Value>,
) -> Response {
    let body: ProjectFullBody = match decode_body(&body) {
        Ok(body) => body,
        Err(problem) => return problem.into_response(),
    };

    for graph in &body.graphs {
        if !graph.agents.iter().any(|a| a.id == graph.default_agent_id) {
            return validation_failure(
                "/graphs/defaultAgentId",
                format!("default agent '{}' is not in the graph", graph.default_agent_id),
            )
            .into_response();
        }
        for relation in &graph.relations {
            if RelationType::parse(&relation.relation_type).is_none() {
                return validation_failure(
                    "/graphs/relations/relationType",
                    "must be 'transfer' or 'delegate'",
                )
                .into_response();
            }
            if relation.target_agent_id.is_none() && relation.external_agent.is_none() {
                return validation_failure(
                    "/graphs/relations",
                    "either targetAgentId or externalAgent is required",
                )
                .into_response();
            }
        }
    }

    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };

    use diesel::Connection;
    let result = conn.transaction::<bool, crate::database::DbError, _>(|conn| {
            let created = Project::upsert(
                conn,
                &NewProject::new(
                    &scope.tenant_id,
                    &project_id,
                    &body.name,
                    &body.description,
                    body.models.as_ref().map(|v| v.to_string()),
                ),
            )?;

            for graph in &body.graphs {
                // Replacing a graph replaces its topology wholesale.
                AgentDefinition::delete_for_graph(conn, &scope.tenant_id, &project_id, &graph.id)?;
                AgentRelation::delete_for_graph(conn, &scope.tenant_id, &project_id, &graph.id)?;

                let mut graph_row = NewAgentGraph::new(
                    &scope.tenant_id,
                    &project_id,
                    &graph.id,
                    &graph.name,
                    &graph.default_agent_id,
                );
                graph_row.models_json = graph.models.as_ref().map(|v| v.to_string());
                graph_row.stop_when_json = graph.stop_when.as_ref().map(|v| v.to_string());
                if AgentGraph::find(conn, &scope.tenant_id, &project_id, &graph.id)?.is_some() {
                    AgentGraph::replace(conn, &graph_row)?;
                } else {
                    AgentGraph::insert(conn, &graph_row)?;
                }

                for agent in &graph.agents {
                    let mut row = NewAgentDefinition::new(
                        &scope.tenant_id,
                        &project_id,
                        &graph.id,
                        &agent.id,
                        &agent.name,
                        &agent.description,
                        &agent.prompt,
                    )
                    .with_tools(&agent.tool_ids);
                    row.history_config_json = agent
                        .conversation_history_config
                        .as_ref()
                        .map(|v| v.to_string());
                    row.models_json = agent.models.as_ref().map(|v| v.to_string());
                    AgentDefinition::insert(conn, &row)?;
                }

                for relation in &graph.relations {
                    let relation_type = RelationType::parse(&relation.relation_type)
                        .unwrap_or(RelationType::Transfer);
                    let row = match (&relation.target_agent_id, &relation.external_agent) {
                        (Some(target), _) => NewAgentRelation::internal(
                            &scope.tenant_id,
                            &project_id,
                            &graph.id,
                            &relation.source_agent_id,
                            target,
                            relation_type,
                        ),
                        (None, Some(external)) => NewAgentRelation::external(
                            &scope.tenant_id,
                            &project_id,
                            &graph.id,
                            &relation.source_agent_id,
                            &external.url,
                            &external.name,
                            &external.description,
                            relation_type,
                        ),
                        (None, None) => unreachable!("validated above"),
                    };
                    AgentRelation::insert(conn, &row)?;
                }
            }

            for tool in &body.tools {
                if Tool::find(conn, &scope.tenant_id, &project_id, &tool.id)?.is_none() {
                    Tool::insert(
                        conn,
                        &NewTool::new(
                            &scope.tenant_id,
                            &project_id,
                            &tool.id,
                            &tool.name,
                            &tool.config,
                            tool.credential_reference_id.clone(),
                        )?,
                    )?;
                }
            }

            Ok(created)
        });

    match result {
        Ok(true) => (StatusCode::CREATED, Json(json!({"id": project_id}))).into_response(),
        Ok(false) => (StatusCode::OK, Json(json!({"id": project_id}))).into_response(),
        Err(e) if is_unique_violation(&e) => {
            Problem::unprocessable("duplicate relation").into_response()
        }
        Err(e) => from_db_error(&e).into_response(),
    }
}

// ─── API keys ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateApiKeyBody {
    graph_id: String,
    #[serde(default)]
    expires_at: Option<String>,
}

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<ExecutionScope>,
    Json(body): Json<Value>,
) -> Response {
    let body: CreateApiKeyBody = match decode_body(&body) {
        Ok(body) => body,
        Err(problem) => return problem.into_response(),
    };

    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };

    // The key must point at an existing graph in this scope.
    match AgentGraph::find(&mut conn, &scope.tenant_id, &scope.project_id, &body.graph_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Problem::not_found().into_response(),
        Err(e) => return from_db_error(&e).into_response(),
    }

    let mut generated = generate_key(&scope.tenant_id, &scope.project_id, &body.graph_id);
    generated.row.expires_at = body.expires_at;

    match ApiKey::insert(&mut conn, &generated.row) {
        Ok(()) => {
            // The only response that ever carries the raw key.
            let body = json!({
                "apiKey": {
                    "id": generated.row.id,
                    "graphId": generated.row.graph_id,
                    "publicId": generated.row.public_id,
                    "keyPrefix": generated.row.key_prefix,
                    "expiresAt": generated.row.expires_at,
                    "createdAt": generated.row.created_at,
                },
                "key": generated.raw_key,
            });
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => from_db_error(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<ExecutionScope>,
    Query(query): Query<ListQuery>,
) -> Response {
    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };
    match ApiKey::list(
        &mut conn,
        &scope.tenant_id,
        &scope.project_id,
        clamp_limit(query.limit),
    ) {
        Ok(keys) => Json(json!({"apiKeys": keys})).into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}

pub async fn get_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(scope): Extension<ExecutionScope>,
) -> Response {
    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };
    match ApiKey::find(&mut conn, &scope.tenant_id, &scope.project_id, &id) {
        Ok(Some(key)) => Json(key).into_response(),
        Ok(None) => Problem::not_found().into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}

pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(scope): Extension<ExecutionScope>,
) -> Response {
    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };
    match ApiKey::delete(&mut conn, &scope.tenant_id, &scope.project_id, &id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => Problem::not_found().into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}

// ─── Credential references ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCredentialBody {
    id: String,
    #[serde(rename = "type")]
    credential_type: String,
    credential_store_id: String,
    #[serde(default)]
    retrieval_params: Option<Value>,
}

pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<ExecutionScope>,
    Json(body): Json<Value>,
) -> Response {
    let body: CreateCredentialBody = match decode_body(&body) {
        Ok(body) => body,
        Err(problem) => return problem.into_response(),
    };
    if body.id.trim().is_empty() {
        return validation_failure("/id", "must not be empty").into_response();
    }

    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };

    let row = NewCredentialReference::new(
        &scope.tenant_id,
        &scope.project_id,
        &body.id,
        &body.credential_type,
        &body.credential_store_id,
        body.retrieval_params.as_ref(),
    );
    match CredentialReference::insert(&mut conn, &row) {
        Ok(()) => (StatusCode::CREATED, Json(json!({"id": body.id}))).into_response(),
        Err(e) if is_unique_violation(&e) => Problem::conflict("duplicate id").into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(scope): Extension<ExecutionScope>,
) -> Response {
    let reference = {
        let mut conn = match state.pool.get() {
            Ok(conn) => conn,
            Err(e) => return from_db_error(&e.into()).into_response(),
        };
        match CredentialReference::find(&mut conn, &scope.tenant_id, &scope.project_id, &id) {
            Ok(Some(reference)) => reference,
            Ok(None) => return Problem::not_found().into_response(),
            Err(e) => return from_db_error(&e).into_response(),
        }
    };

    // External delete first, best-effort; local removal is never blocked.
    let key = reference
        .retrieval_params()
        .and_then(|p| p.get("key").and_then(|k| k.as_str()).map(str::to_string))
        .unwrap_or_else(|| reference.id.clone());
    state
        .credentials
        .delete_best_effort(&reference.credential_store_id, &key)
        .await;

    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return from_db_error(&e.into()).into_response(),
    };
    match CredentialReference::delete(&mut conn, &scope.tenant_id, &scope.project_id, &id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => Problem::not_found().into_response(),
        Err(e) => from_db_error(&e).into_response(),
    }
}
