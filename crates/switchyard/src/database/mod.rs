pub mod models;
pub mod schema;

use std::path::Path;

use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database initialization error: {0}")]
    Init(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("diesel error: {0}")]
    Diesel(#[from] diesel::result::Error),
}

/// Open (or create) the ledger at `path`, run pending migrations, and return
/// the connection pool.
pub fn init(path: &Path) -> Result<DbPool, DbError> {
    let db_url = path.to_string_lossy().to_string();

    tracing::info!(path = %db_url, "initializing ledger");

    let manager = ConnectionManager::<SqliteConnection>::new(&db_url);
    let pool = r2d2::Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| DbError::Init(format!("failed to create connection pool: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| DbError::Init(format!("failed to get ledger connection: {e}")))?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

/// In-memory ledger for tests and ephemeral runs. The pool is capped at a
/// single connection so every caller sees the same database.
pub fn init_in_memory() -> Result<DbPool, DbError> {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| DbError::Init(format!("failed to create in-memory pool: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| DbError::Init(format!("failed to get ledger connection: {e}")))?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

fn run_migrations(conn: &mut SqliteConnection) -> Result<(), DbError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| DbError::Migration(e.to_string()))
}

/// Current wall-clock time in the ledger's canonical RFC 3339 form.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_migrates() {
        let pool = init_in_memory().unwrap();
        let mut conn = pool.get().unwrap();

        use diesel::prelude::*;
        let n: i64 = schema::tenants::table
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn file_pool_migrates_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let pool = init(&path).unwrap();
            drop(pool);
        }
        // Re-opening an already-migrated ledger is a no-op.
        let pool = init(&path).unwrap();
        assert!(pool.get().is_ok());
    }
}
