// Hand-maintained diesel schema for the ledger (kept in sync with
// migrations/2025-07-01-000000_create_ledger).

diesel::table! {
    tenants (id) {
        id -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    projects (pk) {
        pk -> Integer,
        tenant_id -> Text,
        id -> Text,
        name -> Text,
        description -> Text,
        models_json -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    graphs (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        id -> Text,
        name -> Text,
        default_agent_id -> Text,
        models_json -> Nullable<Text>,
        stop_when_json -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agents (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        graph_id -> Text,
        id -> Text,
        name -> Text,
        description -> Text,
        prompt -> Text,
        tool_ids_json -> Nullable<Text>,
        history_config_json -> Nullable<Text>,
        models_json -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agent_relations (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        graph_id -> Text,
        id -> Text,
        source_agent_id -> Text,
        target_agent_id -> Nullable<Text>,
        external_url -> Nullable<Text>,
        external_name -> Nullable<Text>,
        external_description -> Nullable<Text>,
        relation_type -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    tools (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        id -> Text,
        name -> Text,
        config_json -> Text,
        credential_reference_id -> Nullable<Text>,
        status -> Text,
        available_tools_json -> Nullable<Text>,
        last_health_check -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    credential_references (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        id -> Text,
        credential_type -> Text,
        credential_store_id -> Text,
        retrieval_params_json -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    context_configs (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        graph_id -> Text,
        id -> Text,
        headers_schema_json -> Nullable<Text>,
        context_variables_json -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    conversations (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        id -> Text,
        active_agent_id -> Nullable<Text>,
        title -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    tasks (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        graph_id -> Text,
        id -> Text,
        context_id -> Text,
        agent_id -> Text,
        status -> Text,
        metadata_json -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    messages (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        conversation_id -> Text,
        id -> Text,
        role -> Text,
        content -> Text,
        message_type -> Text,
        visibility -> Text,
        from_agent_id -> Nullable<Text>,
        to_agent_id -> Nullable<Text>,
        from_external_agent_id -> Nullable<Text>,
        to_external_agent_id -> Nullable<Text>,
        task_id -> Nullable<Text>,
        a2a_task_id -> Nullable<Text>,
        metadata_json -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    artifacts (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        task_id -> Text,
        artifact_id -> Text,
        name -> Text,
        description -> Text,
        parts_json -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    api_keys (pk) {
        pk -> Integer,
        tenant_id -> Text,
        project_id -> Text,
        graph_id -> Text,
        id -> Text,
        public_id -> Text,
        key_hash -> Text,
        key_prefix -> Text,
        expires_at -> Nullable<Text>,
        last_used_at -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tenants,
    projects,
    graphs,
    agents,
    agent_relations,
    tools,
    credential_references,
    context_configs,
    conversations,
    tasks,
    messages,
    artifacts,
    api_keys,
);
