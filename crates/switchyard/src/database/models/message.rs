//! Conversation messages.
//!
//! Messages are the ledger's unit of history. A2A traffic between agents is
//! persisted alongside user-facing chat; visibility scoping decides what each
//! reader (the user, another agent's prompt) gets to see.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::messages;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Chat,
    A2aRequest,
    A2aResponse,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::A2aRequest => "a2a-request",
            MessageType::A2aResponse => "a2a-response",
            MessageType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<MessageType> {
        match s {
            "chat" => Some(MessageType::Chat),
            "a2a-request" => Some(MessageType::A2aRequest),
            "a2a-response" => Some(MessageType::A2aResponse),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }

    pub fn is_a2a(&self) -> bool {
        matches!(self, MessageType::A2aRequest | MessageType::A2aResponse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageVisibility {
    UserFacing,
    Internal,
    External,
}

impl MessageVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageVisibility::UserFacing => "user-facing",
            MessageVisibility::Internal => "internal",
            MessageVisibility::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<MessageVisibility> {
        match s {
            "user-facing" => Some(MessageVisibility::UserFacing),
            "internal" => Some(MessageVisibility::Internal),
            "external" => Some(MessageVisibility::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = messages)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub conversation_id: String,
    pub id: String,
    pub role: String,
    pub content: String,
    pub message_type: String,
    pub visibility: String,
    pub from_agent_id: Option<String>,
    pub to_agent_id: Option<String>,
    pub from_external_agent_id: Option<String>,
    pub to_external_agent_id: Option<String>,
    pub task_id: Option<String>,
    pub a2a_task_id: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub tenant_id: String,
    pub project_id: String,
    pub conversation_id: String,
    pub id: String,
    pub role: String,
    pub content: String,
    pub message_type: String,
    pub visibility: String,
    pub from_agent_id: Option<String>,
    pub to_agent_id: Option<String>,
    pub from_external_agent_id: Option<String>,
    pub to_external_agent_id: Option<String>,
    pub task_id: Option<String>,
    pub a2a_task_id: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

impl NewMessage {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
        message_type: MessageType,
        visibility: MessageVisibility,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            conversation_id: conversation_id.into(),
            id: crate::short_id(),
            role: role.into(),
            content: content.into(),
            message_type: message_type.as_str().to_string(),
            visibility: visibility.as_str().to_string(),
            from_agent_id: None,
            to_agent_id: None,
            from_external_agent_id: None,
            to_external_agent_id: None,
            task_id: None,
            a2a_task_id: None,
            metadata_json: None,
            created_at: now_rfc3339(),
        }
    }

    pub fn from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.from_agent_id = Some(agent_id.into());
        self
    }

    pub fn to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent_id = Some(agent_id.into());
        self
    }

    pub fn from_external_agent(mut self, id: impl Into<String>) -> Self {
        self.from_external_agent_id = Some(id.into());
        self
    }

    pub fn to_external_agent(mut self, id: impl Into<String>) -> Self {
        self.to_external_agent_id = Some(id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_a2a_task(mut self, a2a_task_id: impl Into<String>) -> Self {
        self.a2a_task_id = Some(a2a_task_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// A2A messages must name exactly one sender and one receiver, internal
    /// or external on each side.
    pub fn validate(&self) -> Result<(), DbError> {
        let mt = MessageType::parse(&self.message_type)
            .ok_or_else(|| DbError::InvalidData(format!("message type: {}", self.message_type)))?;
        if mt.is_a2a() {
            let froms =
                self.from_agent_id.is_some() as u8 + self.from_external_agent_id.is_some() as u8;
            let tos = self.to_agent_id.is_some() as u8 + self.to_external_agent_id.is_some() as u8;
            if froms != 1 || tos != 1 {
                return Err(DbError::InvalidData(
                    "a2a message requires exactly one sender and one receiver".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Message {
    pub fn insert(conn: &mut SqliteConnection, new: &NewMessage) -> Result<(), DbError> {
        new.validate()?;
        diesel::insert_into(messages::table).values(new).execute(conn)?;
        Ok(())
    }

    /// All messages of a conversation in creation order.
    pub fn list_for_conversation(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, DbError> {
        let rows = messages::table
            .filter(messages::tenant_id.eq(tenant_id))
            .filter(messages::project_id.eq(project_id))
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::pk.asc())
            .select(Message::as_select())
            .load(conn)?;
        Ok(rows)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.message_type)
    }

    pub fn visibility(&self) -> Option<MessageVisibility> {
        MessageVisibility::parse(&self.visibility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn a2a_message_requires_exactly_one_endpoint_each_way() {
        let base = NewMessage::new(
            "t",
            "p",
            "c1",
            "agent",
            "ping",
            MessageType::A2aRequest,
            MessageVisibility::Internal,
        );

        // No endpoints at all.
        assert!(base.clone().validate().is_err());

        // One each way is fine.
        let ok = base.clone().from_agent("a").to_agent("b");
        assert!(ok.validate().is_ok());

        // Internal + external sender simultaneously is rejected.
        let bad = base.from_agent("a").from_external_agent("x").to_agent("b");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn chat_message_needs_no_endpoints() {
        let msg = NewMessage::new(
            "t",
            "p",
            "c1",
            "user",
            "hello",
            MessageType::Chat,
            MessageVisibility::UserFacing,
        );
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn list_preserves_insertion_order() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        for i in 0..3 {
            let msg = NewMessage::new(
                "t",
                "p",
                "c1",
                "user",
                format!("msg {i}"),
                MessageType::Chat,
                MessageVisibility::UserFacing,
            );
            Message::insert(&mut conn, &msg).unwrap();
        }

        let rows = Message::list_for_conversation(&mut conn, "t", "p", "c1").unwrap();
        let contents: Vec<&str> = rows.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2"]);
    }
}
