//! API keys.
//!
//! The ledger stores only the public id, a display prefix, and a SHA-256 hash
//! of the full raw key. The raw key exists in exactly one place: the creation
//! response.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::api_keys;
use crate::database::{DbError, now_rfc3339};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = api_keys)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub public_id: String,
    #[serde(skip)]
    pub key_hash: String,
    pub key_prefix: String,
    pub expires_at: Option<String>,
    pub last_used_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = api_keys)]
pub struct NewApiKey {
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub id: String,
    pub public_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub expires_at: Option<String>,
    pub last_used_at: Option<String>,
    pub created_at: String,
}

impl ApiKey {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<Option<ApiKey>, DbError> {
        let row = api_keys::table
            .filter(api_keys::tenant_id.eq(tenant_id))
            .filter(api_keys::project_id.eq(project_id))
            .filter(api_keys::id.eq(id))
            .select(ApiKey::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Lookup by the 12-char public id extracted from a presented key. This
    /// runs before the caller is authenticated, so it is not tenant-scoped.
    pub fn find_by_public_id(
        conn: &mut SqliteConnection,
        public_id: &str,
    ) -> Result<Option<ApiKey>, DbError> {
        let row = api_keys::table
            .filter(api_keys::public_id.eq(public_id))
            .select(ApiKey::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn list(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ApiKey>, DbError> {
        let rows = api_keys::table
            .filter(api_keys::tenant_id.eq(tenant_id))
            .filter(api_keys::project_id.eq(project_id))
            .order(api_keys::pk.asc())
            .limit(limit)
            .select(ApiKey::as_select())
            .load(conn)?;
        Ok(rows)
    }

    pub fn insert(conn: &mut SqliteConnection, new: &NewApiKey) -> Result<(), DbError> {
        diesel::insert_into(api_keys::table).values(new).execute(conn)?;
        Ok(())
    }

    pub fn delete(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        project_id: &str,
        id: &str,
    ) -> Result<bool, DbError> {
        let n = diesel::delete(
            api_keys::table
                .filter(api_keys::tenant_id.eq(tenant_id))
                .filter(api_keys::project_id.eq(project_id))
                .filter(api_keys::id.eq(id)),
        )
        .execute(conn)?;
        Ok(n > 0)
    }

    /// Best-effort bookkeeping after a successful authentication.
    pub fn touch(conn: &mut SqliteConnection, public_id: &str) {
        let res = diesel::update(api_keys::table.filter(api_keys::public_id.eq(public_id)))
            .set(api_keys::last_used_at.eq(Some(now_rfc3339())))
            .execute(conn);
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to update api key last_used_at");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    fn sample(tenant: &str, public_id: &str) -> NewApiKey {
        NewApiKey {
            tenant_id: tenant.to_string(),
            project_id: "p".to_string(),
            graph_id: "g".to_string(),
            id: crate::short_id(),
            public_id: public_id.to_string(),
            key_hash: "ab".repeat(32),
            key_prefix: format!("sk_{public_id}..."),
            expires_at: None,
            last_used_at: None,
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn serialized_row_never_exposes_hash() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = sample("t", "abcdef123456");
        ApiKey::insert(&mut conn, &new).unwrap();

        let row = ApiKey::find_by_public_id(&mut conn, "abcdef123456")
            .unwrap()
            .unwrap();
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains(&row.key_hash));
        assert!(json.contains("keyPrefix"));
    }

    #[test]
    fn delete_then_find_is_none() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = sample("t", "123456abcdef");
        ApiKey::insert(&mut conn, &new).unwrap();

        assert!(ApiKey::delete(&mut conn, "t", "p", &new.id).unwrap());
        assert!(ApiKey::find(&mut conn, "t", "p", &new.id).unwrap().is_none());
        assert!(!ApiKey::delete(&mut conn, "t", "p", &new.id).unwrap());
    }
}
