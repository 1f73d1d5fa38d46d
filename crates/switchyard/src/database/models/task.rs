//! Tasks.
//!
//! A task is one agent turn: created `working` when a user or peer message
//! arrives, finished `completed`/`failed`/`canceled`. Terminal rows are never
//! mutated again except for artifacts attached under their id.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::tasks;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Working,
    Completed,
    Canceled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Working => "working",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Working)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => TaskStatus::Completed,
            "canceled" => TaskStatus::Canceled,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Working,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tasks)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub context_id: String,
    pub agent_id: String,
    pub status: String,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub context_id: String,
    pub agent_id: String,
    pub status: String,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewTask {
    pub fn working(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        graph_id: impl Into<String>,
        id: impl Into<String>,
        context_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            graph_id: graph_id.into(),
            id: id.into(),
            context_id: context_id.into(),
            agent_id: agent_id.into(),
            status: TaskStatus::Working.as_str().to_string(),
            metadata_json: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: &serde_json::Value) -> Self {
        self.metadata_json = Some(metadata.to_string());
        self
    }
}

impl Task {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<Task>, DbError> {
        let row = tasks::table
            .filter(tasks::tenant_id.eq(tenant_id))
            .filter(tasks::project_id.eq(project_id))
            .filter(tasks::id.eq(id))
            .select(Task::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewTask) -> Result<(), DbError> {
        diesel::insert_into(tasks::table).values(new).execute(conn)?;
        Ok(())
    }

    /// Move a task to a new status. Terminal rows are left untouched and the
    /// call reports whether a row actually changed.
    pub fn set_status(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
        status: TaskStatus,
    ) -> Result<bool, DbError> {
        let n = diesel::update(
            tasks::table
                .filter(tasks::tenant_id.eq(tenant_id))
                .filter(tasks::project_id.eq(project_id))
                .filter(tasks::id.eq(id))
                .filter(tasks::status.eq(TaskStatus::Working.as_str())),
        )
        .set((
            tasks::status.eq(status.as_str()),
            tasks::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)?;
        Ok(n > 0)
    }

    pub fn merge_metadata(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), DbError> {
        let Some(row) = Task::find(conn, tenant_id, project_id, id)? else {
            return Ok(());
        };
        let mut merged = row.metadata().unwrap_or_else(|| serde_json::json!({}));
        if let (Some(obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        diesel::update(
            tasks::table
                .filter(tasks::tenant_id.eq(tenant_id))
                .filter(tasks::project_id.eq(project_id))
                .filter(tasks::id.eq(id)),
        )
        .set(tasks::metadata_json.eq(Some(merged.to_string())))
        .execute(conn)?;
        Ok(())
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from(self.status.clone())
    }

    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.metadata_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn terminal_tasks_are_not_mutated() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewTask::working("t", "p", "g", "task1", "c1", "router");
        Task::insert(&mut conn, &new).unwrap();

        assert!(Task::set_status(&mut conn, "t", "p", "task1", TaskStatus::Completed).unwrap());
        // A second transition (e.g. a late cancel) is a no-op.
        assert!(!Task::set_status(&mut conn, "t", "p", "task1", TaskStatus::Canceled).unwrap());

        let row = Task::find(&mut conn, "t", "p", "task1").unwrap().unwrap();
        assert_eq!(row.status(), TaskStatus::Completed);
    }

    #[test]
    fn metadata_merges() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewTask::working("t", "p", "g", "task1", "c1", "router")
            .with_metadata(&serde_json::json!({"streamRequestId": "r1"}));
        Task::insert(&mut conn, &new).unwrap();

        Task::merge_metadata(
            &mut conn,
            "t",
            "p",
            "task1",
            &serde_json::json!({"responseMessageId": "m9"}),
        )
        .unwrap();

        let meta = Task::find(&mut conn, "t", "p", "task1")
            .unwrap()
            .unwrap()
            .metadata()
            .unwrap();
        assert_eq!(meta["streamRequestId"], "r1");
        assert_eq!(meta["responseMessageId"], "m9");
    }
}
