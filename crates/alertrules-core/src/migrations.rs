use std::collections::HashSet;

use libsql::{Connection, params};
use thiserror::Error;
use tracing::debug;

use crate::db::{Database, DbError, now_rfc3339};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: "001_initial",
    sql: include_str!("../../../migrations/001_initial.sql"),
}];

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("failed to read schema_migrations: {0}")]
    Ledger(#[from] libsql::Error),
    #[error("migration {version} failed: {source}")]
    Apply {
        version: &'static str,
        source: libsql::Error,
    },
}

async fn applied_versions(conn: &Connection) -> Result<HashSet<String>, libsql::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        (),
    )
    .await?;

    let mut versions = HashSet::new();
    let mut rows = conn.query("SELECT version FROM schema_migrations", ()).await?;
    while let Some(row) = rows.next().await? {
        versions.insert(row.get::<String>(0)?);
    }
    Ok(versions)
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), libsql::Error> {
    let tx = conn.transaction().await?;
    tx.execute_batch(migration.sql).await?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![migration.version, now_rfc3339()],
    )
    .await?;
    tx.commit().await
}

/// Applies every embedded migration not yet recorded, oldest first.
pub async fn run_migrations(db: &Database) -> Result<(), MigrationError> {
    let conn = db.connection().await?;
    let applied = applied_versions(&conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(m.version)) {
        apply(&conn, migration)
            .await
            .map_err(|source| MigrationError::Apply {
                version: migration.version,
                source,
            })?;
        debug!(version = migration.version, "applied migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(db: &Database) -> Vec<String> {
        let conn = db.connection().await.expect("conn");
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await
            .expect("query tables");
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.expect("row") {
            names.push(row.get::<String>(0).expect("name"));
        }
        names
    }

    #[tokio::test]
    async fn creates_every_collaborator_table_and_is_rerunnable() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("db");

        run_migrations(&db).await.expect("first run");
        run_migrations(&db).await.expect("second run is a no-op");

        let names = table_names(&db).await;
        for table in [
            "authorizations",
            "label_mappings",
            "labels",
            "notification_endpoints",
            "notification_rules",
            "organizations",
            "tasks",
            "user_resource_mappings",
            "users",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
    }
}
