use std::sync::Arc;

use super::*;
use crate::config::SandboxConfig;
use crate::database::init_in_memory;
use crate::database::models::{
    AgentDefinition, AgentGraph, AgentRelation, NewAgentDefinition, NewAgentGraph,
    NewAgentRelation, RelationType,
};
use crate::llm::{CompletionResponse, ScriptedProvider, ToolCall};

fn wire_user_message(text: &str) -> WireMessage {
    WireMessage {
        role: "user".to_string(),
        parts: vec![crate::a2a::WirePart::Text {
            text: text.to_string(),
        }],
        message_id: crate::short_id(),
        context_id: Some("c1".to_string()),
        task_id: None,
        kind: "message".to_string(),
        metadata: None,
    }
}

fn seed_graph(pool: &DbPool) {
    let mut conn = pool.get().unwrap();
    AgentGraph::insert(&mut conn, &NewAgentGraph::new("t", "p", "g", "Support", "a_router")).unwrap();
    AgentDefinition::insert(
        &mut conn,
        &NewAgentDefinition::new(
            "t",
            "p",
            "g",
            "a_router",
            "Router",
            "Routes requests",
            "You are the router.",
        ),
    )
    .unwrap();
    AgentDefinition::insert(
        &mut conn,
        &NewAgentDefinition::new(
            "t",
            "p",
            "g",
            "a_support",
            "Support",
            "Handles billing",
            "You are support.",
        ),
    )
    .unwrap();
    AgentDefinition::insert(
        &mut conn,
        &NewAgentDefinition::new(
            "t",
            "p",
            "g",
            "a_child",
            "Researcher",
            "Researches things",
            "You research.",
        ),
    )
    .unwrap();
    AgentRelation::insert(
        &mut conn,
        &NewAgentRelation::internal("t", "p", "g", "a_router", "a_support", RelationType::Transfer),
    )
    .unwrap();
    AgentRelation::insert(
        &mut conn,
        &NewAgentRelation::internal("t", "p", "g", "a_router", "a_child", RelationType::Delegate),
    )
    .unwrap();
}

fn executor_with(pool: DbPool, provider: Arc<ScriptedProvider>) -> TaskExecutor {
    TaskExecutor::new(
        pool,
        provider,
        Arc::new(FunctionSandboxPool::new(SandboxConfig::default())),
        ToolSessionManager::new_unswept(),
        CredentialStoreRegistry::new(),
        ExecutorConfig::default(),
    )
}

fn scope() -> ExecutionScope {
    ExecutionScope::new("t", "p", "g")
}

#[tokio::test]
async fn plain_reply_completes_task_and_persists_chat() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![CompletionResponse::text(
        "Hello! How can I help?",
    )]));
    let executor = executor_with(pool.clone(), provider.clone());

    let outcome = executor.execute(&scope(), &wire_user_message("hi")).await.unwrap();

    assert_eq!(outcome.task.status(), TaskStatus::Completed);
    assert_eq!(outcome.reply.as_ref().unwrap().text(), "Hello! How can I help?");
    assert!(outcome.transfer_target.is_none());
    assert_eq!(outcome.context_id, "c1");

    let mut conn = pool.get().unwrap();
    let messages = Message::list_for_conversation(&mut conn, "t", "p", "c1").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].from_agent_id.as_deref(), Some("a_router"));
    assert_eq!(messages[1].visibility, "user-facing");

    // The model saw the transfer and delegate tools for the router.
    let seen = provider.seen_requests();
    let tool_names: Vec<&str> = seen[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert!(tool_names.contains(&TRANSFER_TOOL));
    assert!(tool_names.contains(&DELEGATE_TOOL));
}

#[tokio::test]
async fn transfer_updates_active_agent_and_attaches_artifact() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![
        CompletionResponse::calls(vec![ToolCall {
            id: "call-1".to_string(),
            name: TRANSFER_TOOL.to_string(),
            arguments: serde_json::json!({"agentId": "a_support", "reason": "billing question"}),
        }]),
        CompletionResponse::text("Your invoice is fixed."),
    ]));
    let executor = executor_with(pool.clone(), provider);

    let outcome = executor
        .execute(&scope(), &wire_user_message("I need billing help"))
        .await
        .unwrap();

    assert_eq!(outcome.transfer_target.as_deref(), Some("a_support"));
    assert!(outcome.reply.is_none());
    assert_eq!(outcome.task.status(), TaskStatus::Completed);

    let data = outcome.artifacts[0].data().unwrap();
    assert_eq!(data["type"], "transfer");
    assert_eq!(data["targetAgentId"], "a_support");
    assert_eq!(data["fromAgentId"], "a_router");

    {
        let mut conn = pool.get().unwrap();
        let conversation = Conversation::find(&mut conn, "t", "p", "c1").unwrap().unwrap();
        assert_eq!(conversation.active_agent_id.as_deref(), Some("a_support"));
    }

    // The follow-up turn in the same conversation is handled by a_support.
    let followup = executor
        .execute(&scope(), &wire_user_message("thanks, and my invoice?"))
        .await
        .unwrap();
    assert_eq!(followup.task.agent_id, "a_support");
    assert_eq!(followup.reply.unwrap().text(), "Your invoice is fixed.");
}

#[tokio::test]
async fn delegate_shares_session_and_returns_child_result() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![
        // Parent decides to delegate.
        CompletionResponse::calls(vec![ToolCall {
            id: "call-del".to_string(),
            name: DELEGATE_TOOL.to_string(),
            arguments: serde_json::json!({"agentId": "a_child", "message": "find the answer"}),
        }]),
        // Child answers.
        CompletionResponse::text("the answer is 42"),
        // Parent incorporates the result.
        CompletionResponse::text("According to research, the answer is 42."),
    ]));
    let executor = executor_with(pool.clone(), provider);

    let outcome = executor
        .execute(&scope(), &wire_user_message("what is the answer?"))
        .await
        .unwrap();

    assert_eq!(
        outcome.reply.as_ref().unwrap().text(),
        "According to research, the answer is 42."
    );
    assert_eq!(outcome.task.agent_id, "a_router");

    let mut conn = pool.get().unwrap();
    let messages = Message::list_for_conversation(&mut conn, "t", "p", "c1").unwrap();

    // The delegation round-trip is in the ledger as paired a2a messages.
    let a2a_request = messages.iter().find(|m| m.message_type == "a2a-request").unwrap();
    assert_eq!(a2a_request.from_agent_id.as_deref(), Some("a_router"));
    assert_eq!(a2a_request.to_agent_id.as_deref(), Some("a_child"));
    let a2a_response = messages.iter().find(|m| m.message_type == "a2a-response").unwrap();
    assert_eq!(a2a_response.from_agent_id.as_deref(), Some("a_child"));
    assert_eq!(a2a_response.to_agent_id.as_deref(), Some("a_router"));

    // Parent and child ran as distinct tasks in the same conversation.
    let child_task_id = a2a_response.a2a_task_id.clone().unwrap();
    assert_ne!(child_task_id, outcome.task.id);
    let child_task = Task::find(&mut conn, "t", "p", &child_task_id).unwrap().unwrap();
    assert_eq!(child_task.status(), TaskStatus::Completed);
    assert_eq!(child_task.context_id, outcome.context_id);

    // Both tasks share the tool session id recorded in their metadata.
    let parent_session = outcome.task.metadata().unwrap()["sessionId"].clone();
    let child_session = child_task.metadata().unwrap()["sessionId"].clone();
    assert_eq!(parent_session, child_session);
}

#[tokio::test]
async fn delegation_result_recorded_in_tool_session() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![
        CompletionResponse::calls(vec![ToolCall {
            id: "call-del".to_string(),
            name: DELEGATE_TOOL.to_string(),
            arguments: serde_json::json!({"agentId": "a_child", "message": "dig in"}),
        }]),
        CompletionResponse::text("child findings"),
        CompletionResponse::text("done"),
    ]));

    let sessions = ToolSessionManager::new_unswept();
    let executor = TaskExecutor::new(
        pool.clone(),
        provider,
        Arc::new(FunctionSandboxPool::new(SandboxConfig::default())),
        sessions.clone(),
        CredentialStoreRegistry::new(),
        ExecutorConfig::default(),
    );

    // Drive the turn directly with a fixed session id so the scratchpad can
    // be inspected before the surrounding execution would destroy it.
    let outcome = executor
        .run_turn(
            scope(),
            None,
            "c1".to_string(),
            "go".to_string(),
            None,
            TurnOrigin::User,
            "session-fixed".to_string(),
            Arc::new(std::sync::Mutex::new(None)),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.reply.unwrap().text(), "done");
    let record = sessions.get_tool_result("session-fixed", "call-del").unwrap();
    assert_eq!(record.tool_name, DELEGATE_TOOL);
    assert_eq!(record.result["success"], true);
    assert!(record.result["result"]["result"]
        .as_str()
        .unwrap()
        .contains("child findings"));
}

#[tokio::test]
async fn sibling_delegations_fan_out_and_feed_back_in_call_order() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![
        // Parent dispatches two sub-tasks in one response.
        CompletionResponse::calls(vec![
            ToolCall {
                id: "call-a".to_string(),
                name: DELEGATE_TOOL.to_string(),
                arguments: serde_json::json!({"agentId": "a_child", "message": "task one"}),
            },
            ToolCall {
                id: "call-b".to_string(),
                name: DELEGATE_TOOL.to_string(),
                arguments: serde_json::json!({"agentId": "a_child", "message": "task two"}),
            },
        ]),
        // One reply per child; the fan-out decides which child pops which.
        CompletionResponse::text("first finding"),
        CompletionResponse::text("second finding"),
        CompletionResponse::text("combined"),
    ]));

    let sessions = ToolSessionManager::new_unswept();
    let executor = TaskExecutor::new(
        pool.clone(),
        provider.clone(),
        Arc::new(FunctionSandboxPool::new(SandboxConfig::default())),
        sessions.clone(),
        CredentialStoreRegistry::new(),
        ExecutorConfig::default(),
    );

    let outcome = executor
        .run_turn(
            scope(),
            None,
            "c1".to_string(),
            "go".to_string(),
            None,
            TurnOrigin::User,
            "session-fan".to_string(),
            Arc::new(std::sync::Mutex::new(None)),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.reply.unwrap().text(), "combined");

    // Both sibling delegations completed and recorded their results.
    for call_id in ["call-a", "call-b"] {
        let record = sessions.get_tool_result("session-fan", call_id).unwrap();
        assert_eq!(record.tool_name, DELEGATE_TOOL);
        assert_eq!(record.result["success"], true);
    }

    // Two distinct child tasks ran in the same conversation.
    let mut conn = pool.get().unwrap();
    let messages = Message::list_for_conversation(&mut conn, "t", "p", "c1").unwrap();
    let child_ids: Vec<String> = messages
        .iter()
        .filter(|m| m.message_type == "a2a-response")
        .filter_map(|m| m.a2a_task_id.clone())
        .collect();
    assert_eq!(child_ids.len(), 2);
    assert_ne!(child_ids[0], child_ids[1]);

    // The follow-up model request carries the results in call order.
    let seen = provider.seen_requests();
    let fed_back: Vec<&str> = seen
        .last()
        .unwrap()
        .messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(fed_back, vec!["call-a", "call-b"]);
}

#[tokio::test]
async fn context_id_resolution_prefers_metadata_over_default_literal() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![CompletionResponse::text("ok")]));
    let executor = executor_with(pool.clone(), provider);

    let mut inbound = wire_user_message("hello");
    inbound.context_id = Some("default".to_string());
    inbound.metadata = Some(serde_json::json!({"conversationId": "c7"}));

    let outcome = executor.execute(&scope(), &inbound).await.unwrap();
    assert_eq!(outcome.context_id, "c7");
    assert_eq!(outcome.task.context_id, "c7");

    let mut conn = pool.get().unwrap();
    assert!(Conversation::find(&mut conn, "t", "p", "c7").unwrap().is_some());
}

#[tokio::test]
async fn unknown_graph_is_agent_not_found() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = executor_with(pool, provider);

    let wrong_scope = ExecutionScope::new("t", "p", "missing-graph");
    let err = executor
        .execute(&wrong_scope, &wire_user_message("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::AgentNotFound));
}

#[tokio::test]
async fn provider_failure_marks_task_failed() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    // Empty script: the first completion call fails.
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = executor_with(pool.clone(), provider);

    let err = executor.execute(&scope(), &wire_user_message("hi")).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Provider(_)));

    let mut conn = pool.get().unwrap();
    let messages = Message::list_for_conversation(&mut conn, "t", "p", "c1").unwrap();
    let failure_note = messages.iter().find(|m| m.message_type == "system").unwrap();
    assert_eq!(failure_note.visibility, "internal");

    let task_id = failure_note.task_id.clone().unwrap();
    let task = Task::find(&mut conn, "t", "p", &task_id).unwrap().unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
}

#[tokio::test]
async fn cancel_task_marks_idle_working_row() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    {
        let mut conn = pool.get().unwrap();
        Task::insert(&mut conn, &NewTask::working("t", "p", "g", "task-x", "c1", "a_router")).unwrap();
    }
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = executor_with(pool.clone(), provider);

    assert!(executor.cancel_task(&scope(), "task-x").unwrap());
    {
        let mut conn = pool.get().unwrap();
        let task = Task::find(&mut conn, "t", "p", "task-x").unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Canceled);
    }

    assert!(!executor.cancel_task(&scope(), "no-such-task").unwrap());
}

#[tokio::test]
async fn cancel_task_requires_matching_scope() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    {
        let mut conn = pool.get().unwrap();
        Task::insert(&mut conn, &NewTask::working("t", "p", "g", "task-y", "c1", "a_router")).unwrap();
    }
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = executor_with(pool, provider);

    // Simulate an in-flight turn for the task.
    let handle = executor.control().register("task-y");

    // A foreign tenant cannot cancel it, live or not, and learns nothing.
    let foreign = ExecutionScope::new("other-tenant", "p", "g");
    assert!(!executor.cancel_task(&foreign, "task-y").unwrap());
    assert!(!handle.is_canceled());

    // The owning scope can.
    assert!(executor.cancel_task(&scope(), "task-y").unwrap());
    assert!(handle.is_canceled());
}

#[tokio::test]
async fn unknown_tool_call_feeds_error_back_to_model() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    let provider = Arc::new(ScriptedProvider::new(vec![
        CompletionResponse::calls(vec![ToolCall {
            id: "call-1".to_string(),
            name: "no_such_tool".to_string(),
            arguments: serde_json::json!({}),
        }]),
        CompletionResponse::text("recovered"),
    ]));
    let executor = executor_with(pool, provider.clone());

    let outcome = executor.execute(&scope(), &wire_user_message("hi")).await.unwrap();
    assert_eq!(outcome.reply.unwrap().text(), "recovered");

    // The second request carried the tool error back to the model.
    let seen = provider.seen_requests();
    let tool_msg = seen[1]
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call-1"))
        .unwrap();
    assert!(tool_msg.content.contains("unknown tool"));
}

#[test]
fn parse_step_limit_reads_stop_when() {
    assert_eq!(parse_step_limit(Some(r#"{"stepCountIs": 3}"#)), Some(3));
    assert_eq!(parse_step_limit(Some(r#"{"stepCountIs": 0}"#)), Some(1));
    assert_eq!(parse_step_limit(Some("{}")), None);
    assert_eq!(parse_step_limit(None), None);
}

#[tokio::test]
async fn step_limit_caps_tool_iterations() {
    let pool = init_in_memory().unwrap();
    seed_graph(&pool);
    {
        let mut conn = pool.get().unwrap();
        use crate::database::schema::graphs;
        use diesel::prelude::*;
        diesel::update(graphs::table.filter(graphs::id.eq("g")))
            .set(graphs::stop_when_json.eq(Some(r#"{"stepCountIs": 1}"#)))
            .execute(&mut conn)
            .unwrap();
    }
    // The model keeps asking for an unknown tool; the single allowed step
    // exhausts the loop and the turn falls back to the step-limit reply.
    let provider = Arc::new(ScriptedProvider::new(vec![
        CompletionResponse::calls(vec![ToolCall {
            id: "c1".to_string(),
            name: "no_such_tool".to_string(),
            arguments: serde_json::json!({}),
        }]),
        CompletionResponse::text("never reached"),
    ]));
    let executor = executor_with(pool, provider);

    let outcome = executor.execute(&scope(), &wire_user_message("go")).await.unwrap();
    assert!(outcome
        .reply
        .unwrap()
        .text()
        .contains("could not complete the request"));
}

#[test]
fn parse_model_accepts_string_and_object() {
    assert_eq!(parse_model(Some("\"gpt-4o\"")), Some("gpt-4o".to_string()));
    assert_eq!(
        parse_model(Some(r#"{"model": "claude-sonnet"}"#)),
        Some("claude-sonnet".to_string())
    );
    assert_eq!(
        parse_model(Some(r#"{"default": "gemini"}"#)),
        Some("gemini".to_string())
    );
    assert_eq!(parse_model(Some("{}")), None);
    assert_eq!(parse_model(None), None);
}
