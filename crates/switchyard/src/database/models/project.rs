//! Tenants and projects.
//!
//! A tenant is the top-level isolation boundary; every other row in the
//! ledger carries its `tenant_id`. Lookups that cross a tenant boundary
//! return `None`, never an authorization error.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::schema::{projects, tenants};
use crate::database::{DbError, now_rfc3339};

/// A project within a tenant.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = projects)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(skip)]
    pub pk: i32,
    pub tenant_id: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub models_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub tenant_id: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub models_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NewProject {
    pub fn new(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        models_json: Option<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            name: name.into(),
            description: description.into(),
            models_json,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Insert the tenant row if it does not exist yet.
pub fn ensure_tenant(conn: &mut SqliteConnection, tenant_id: &str) -> Result<(), DbError> {
    diesel::insert_or_ignore_into(tenants::table)
        .values((
            tenants::id.eq(tenant_id),
            tenants::created_at.eq(now_rfc3339()),
        ))
        .execute(conn)?;
    Ok(())
}

impl Project {
    pub fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<Project>, DbError> {
        let row = projects::table
            .filter(projects::tenant_id.eq(tenant_id))
            .filter(projects::id.eq(id))
            .select(Project::as_select())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Upsert a project. Returns `true` when the row was newly created.
    pub fn upsert(conn: &mut SqliteConnection, new: &NewProject) -> Result<bool, DbError> {
        ensure_tenant(conn, &new.tenant_id)?;
        let existing = Project::find(conn, &new.tenant_id, &new.id)?;
        match existing {
            Some(_) => {
                diesel::update(
                    projects::table
                        .filter(projects::tenant_id.eq(&new.tenant_id))
                        .filter(projects::id.eq(&new.id)),
                )
                .set((
                    projects::name.eq(&new.name),
                    projects::description.eq(&new.description),
                    projects::models_json.eq(&new.models_json),
                    projects::updated_at.eq(now_rfc3339()),
                ))
                .execute(conn)?;
                Ok(false)
            }
            None => {
                diesel::insert_into(projects::table)
                    .values(new)
                    .execute(conn)?;
                Ok(true)
            }
        }
    }

    pub fn delete(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> Result<bool, DbError> {
        let n = diesel::delete(
            projects::table
                .filter(projects::tenant_id.eq(tenant_id))
                .filter(projects::id.eq(id)),
        )
        .execute(conn)?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_in_memory;

    #[test]
    fn upsert_creates_then_updates() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewProject::new("t1", "p1", "First", "", None);
        assert!(Project::upsert(&mut conn, &new).unwrap());

        let renamed = NewProject::new("t1", "p1", "Renamed", "desc", None);
        assert!(!Project::upsert(&mut conn, &renamed).unwrap());

        let row = Project::find(&mut conn, "t1", "p1").unwrap().unwrap();
        assert_eq!(row.name, "Renamed");
        assert_eq!(row.description, "desc");
    }

    #[test]
    fn cross_tenant_find_is_none() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        let new = NewProject::new("tenant-a", "p1", "A", "", None);
        Project::upsert(&mut conn, &new).unwrap();

        assert!(Project::find(&mut conn, "tenant-b", "p1").unwrap().is_none());
    }
}
