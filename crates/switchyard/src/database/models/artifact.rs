//! Task artifacts.
//!
//! Structured outputs attached to a task: named bundles of text and data
//! parts. Transfer/delegate signals travel as data parts whose payload is
//! discriminated by `data.type`.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::artifacts;
use crate::database::{DbError, now_rfc3339};

/// One part of an artifact: free text or an opaque JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactPart {
    Text { text: String },
    Data { data: serde_json::Value },
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = artifacts)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub task_id: String,
    pub artifact_id: String,
    pub name: String,
    pub description: String,
    pub parts_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = artifacts)]
pub struct NewArtifact {
    pub tenant_id: String,
    pub project_id: String,
    pub task_id: String,
    pub artifact_id: String,
    pub name: String,
    pub description: String,
    pub parts_json: String,
    pub created_at: String,
}

impl NewArtifact {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        task_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        parts: &[ArtifactPart],
    ) -> Result<Self, DbError> {
        let parts_json = serde_json::to_string(parts)
            .map_err(|e| DbError::InvalidData(format!("artifact parts: {e}")))?;
        Ok(Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            task_id: task_id.into(),
            artifact_id: crate::short_id(),
            name: name.into(),
            description: description.into(),
            parts_json,
            created_at: now_rfc3339(),
        })
    }
}

impl Artifact {
    pub fn insert(conn: &mut SqliteConnection, new: &NewArtifact) -> Result<(), DbError> {
        diesel::insert_into(artifacts::table)
            .values(new)
            .execute(conn)?;
        Ok(())
    }

    pub fn list_for_task(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> Result<Vec<Artifact>, DbError> {
        let rows = artifacts::table
            .filter(artifacts::tenant_id.eq(tenant_id))
            .filter(artifacts::project_id.eq(project_id))
            .filter(artifacts::task_id.eq(task_id))
            .order(artifacts::pk.asc())
            .select(Artifact::as_select())
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_for_tasks(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        task_ids: &[String],
    ) -> Result<Vec<Artifact>, DbError> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = artifacts::table
            .filter(artifacts::tenant_id.eq(tenant_id))
            .filter(artifacts::project_id.eq(project_id))
            .filter(artifacts::task_id.eq_any(task_ids))
            .order(artifacts::pk.asc())
            .select(Artifact::as_select())
            .load(conn)?;
        Ok(rows)
    }

    pub fn parts(&self) -> Vec<ArtifactPart> {
        serde_json::from_str(&self.parts_json).unwrap_or_default()
    }

    /// The first data part, if any. Transfer/delegate detection reads this.
    pub fn data(&self) -> Option<serde_json::Value> {
        self.parts().into_iter().find_map(|p| match p {
            ArtifactPart::Data { data } => Some(data),
            ArtifactPart::Text { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn parts_round_trip() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let parts = vec![
            ArtifactPart::Text {
                text: "transferring".to_string(),
            },
            ArtifactPart::Data {
                data: serde_json::json!({"type": "transfer", "targetAgentId": "support"}),
            },
        ];
        let new = NewArtifact::new("t", "p", "task1", "transfer", "", &parts).unwrap();
        Artifact::insert(&mut conn, &new).unwrap();

        let rows = Artifact::list_for_task(&mut conn, "t", "p", "task1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parts(), parts);
        assert_eq!(rows[0].data().unwrap()["targetAgentId"], "support");
    }

    #[test]
    fn part_kind_tags() {
        let text = ArtifactPart::Text {
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["kind"], "text");

        let data = ArtifactPart::Data {
            data: serde_json::json!({"a": 1}),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "data");
    }
}
