//! Conversations (threads).
//!
//! `active_agent_id` is the transfer target: it survives across requests and
//! is updated atomically with task completion when a transfer fires.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::conversations;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = conversations)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub active_agent_id: Option<String>,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub active_agent_id: Option<String>,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewConversation {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        id: impl Into<String>,
        active_agent_id: Option<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            id: id.into(),
            active_agent_id,
            title: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Conversation {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<Conversation>, DbError> {
        let row = conversations::table
            .filter(conversations::tenant_id.eq(tenant_id))
            .filter(conversations::project_id.eq(project_id))
            .filter(conversations::id.eq(id))
            .select(Conversation::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Fetch the conversation, creating it when absent. Returns the row plus
    /// whether it was newly created (initialization context fetches key off
    /// this flag).
    pub fn find_or_create(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
        default_agent_id: &str,
    ) -> Result<(Conversation, bool), DbError> {
        if let Some(existing) = Conversation::find(conn, tenant_id, project_id, id)? {
            return Ok((existing, false));
        }
        let new = NewConversation::new(
            tenant_id,
            project_id,
            id,
            Some(default_agent_id.to_string()),
        );
        diesel::insert_into(conversations::table)
            .values(&new)
            .execute(conn)?;
        let row = Conversation::find(conn, tenant_id, project_id, id)?
            .ok_or_else(|| DbError::InvalidData("conversation vanished after insert".into()))?;
        Ok((row, true))
    }

    pub fn set_active_agent(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
        agent_id: &str,
    ) -> Result<(), DbError> {
        diesel::update(
            conversations::table
                .filter(conversations::tenant_id.eq(tenant_id))
                .filter(conversations::project_id.eq(project_id))
                .filter(conversations::id.eq(id)),
        )
        .set((
            conversations::active_agent_id.eq(Some(agent_id)),
            conversations::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)?;
        Ok(())
    }
}
