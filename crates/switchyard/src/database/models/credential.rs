//! Credential references.
//!
//! A reference names a credential held by a pluggable store; the ledger never
//! sees the secret itself, only `(type, store id, retrieval params)`.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::credential_references;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = credential_references)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReference {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub credential_type: String,
    pub credential_store_id: String,
    pub retrieval_params_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = credential_references)]
pub struct NewCredentialReference {
    pub tenant_id: String,
    pub project_id: String,
    pub id: String,
    pub credential_type: String,
    pub credential_store_id: String,
    pub retrieval_params_json: Option<String>,
    pub created_at: String,
}

impl NewCredentialReference {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        id: impl Into<String>,
        credential_type: impl Into<String>,
        credential_store_id: impl Into<String>,
        retrieval_params: Option<&serde_json::Value>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            id: id.into(),
            credential_type: credential_type.into(),
            credential_store_id: credential_store_id.into(),
            retrieval_params_json: retrieval_params.map(|v| v.to_string()),
            created_at: now_rfc3339(),
        }
    }
}

impl CredentialReference {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<CredentialReference>, DbError> {
        let row = credential_references::table
            .filter(credential_references::tenant_id.eq(tenant_id))
            .filter(credential_references::project_id.eq(project_id))
            .filter(credential_references::id.eq(id))
            .select(CredentialReference::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn insert(
        conn: &mut SqliteConnection,
        new: &NewCredentialReference,
    ) -> Result<(), DbError> {
        diesel::insert_into(credential_references::table)
            .values(new)
            .execute(conn)?;
        Ok(())
    }

    pub fn delete(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<bool, DbError> {
        let n = diesel::delete(
            credential_references::table
                .filter(credential_references::tenant_id.eq(tenant_id))
                .filter(credential_references::project_id.eq(project_id))
                .filter(credential_references::id.eq(id)),
        )
        .execute(conn)?;
        Ok(n > 0)
    }

    pub fn retrieval_params(&self) -> Option<serde_json::Value> {
        self.retrieval_params_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn insert_find_delete() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewCredentialReference::new(
            "t",
            "p",
            "cred1",
            "api-key",
            "memory-default",
            Some(&serde_json::json!({"key": "github-token"})),
        );
        CredentialReference::insert(&mut conn, &new).unwrap();

        let row = CredentialReference::find(&mut conn, "t", "p", "cred1")
            .unwrap()
            .unwrap();
        assert_eq!(row.credential_store_id, "memory-default");
        assert_eq!(row.retrieval_params().unwrap()["key"], "github-token");

        assert!(CredentialReference::delete(&mut conn, "t", "p", "cred1").unwrap());
        assert!(CredentialReference::find(&mut conn, "t", "p", "cred1")
            .unwrap()
            .is_none());
    }
}
