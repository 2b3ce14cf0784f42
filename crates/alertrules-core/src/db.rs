use std::{env, path::Path, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;

#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database: {0}")]
    Build(libsql::Error),
    #[error("failed to open connection: {0}")]
    Connect(libsql::Error),
    #[error("failed to execute statement: {0}")]
    Statement(libsql::Error),
    #[error("missing required LIBSQL_AUTH_TOKEN for remote database")]
    MissingAuthToken,
}

/// Where the rule database lives, derived from `paths.database`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(String),
    Remote { url: String, auth_token: String },
}

impl Location {
    fn resolve(database_path: &Path) -> Result<Self, DbError> {
        let location = database_path.to_string_lossy().into_owned();
        let remote = ["libsql://", "http://", "https://"]
            .iter()
            .any(|scheme| location.starts_with(scheme));
        if !remote {
            return Ok(Self::File(location));
        }

        match env::var("LIBSQL_AUTH_TOKEN") {
            Ok(auth_token) if !auth_token.is_empty() => Ok(Self::Remote {
                url: location,
                auth_token,
            }),
            _ => Err(DbError::MissingAuthToken),
        }
    }

    async fn open(self) -> Result<LibSqlDatabase, DbError> {
        let built = match self {
            Self::File(path) => Builder::new_local(path).build().await,
            Self::Remote { url, auth_token } => Builder::new_remote(url, auth_token).build().await,
        };
        built.map_err(DbError::Build)
    }
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self, DbError> {
        let inner = Location::resolve(database_path)?.open().await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Opens a connection with foreign keys enforced, so rule rows cannot
    /// outlive their endpoint or organization.
    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;
        Ok(conn)
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT count(*) FROM schema_migrations", ())
            .await
            .map_err(DbError::Statement)?;
        rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }
}

/// Timestamp format used for every persisted audit column.
pub(crate) fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[tokio::test]
    async fn connection_enables_foreign_keys() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        let conn = db.connection().await.expect("open connection");
        let mut rows = conn
            .query("PRAGMA foreign_keys", ())
            .await
            .expect("query pragma");
        let value: i64 = rows
            .next()
            .await
            .expect("row present")
            .expect("row")
            .get(0)
            .expect("get value");
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn health_check_requires_migrated_schema() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        assert!(db.health_check().await.is_err());

        crate::migrations::run_migrations(&db).await.expect("migrations");
        db.health_check().await.expect("health check passes");
    }

    #[test]
    fn plain_paths_resolve_to_files() {
        assert_eq!(
            Location::resolve(Path::new("/var/lib/alertrules/rules.db")).expect("resolve"),
            Location::File("/var/lib/alertrules/rules.db".into())
        );
    }

    #[tokio::test]
    async fn remote_location_requires_auth_token() {
        let _guard = ENV_LOCK.lock().expect("lock env");
        unsafe { env::remove_var("LIBSQL_AUTH_TOKEN") };
        let result = Database::new(Path::new("libsql://rules.example.com/db")).await;
        assert!(matches!(result, Err(DbError::MissingAuthToken)));
    }

    #[test]
    fn timestamps_round_trip_with_millisecond_precision() {
        let parsed = parse_rfc3339("2024-05-01T10:20:30.123Z").expect("parse");
        assert_eq!(to_rfc3339(parsed), "2024-05-01T10:20:30.123Z");
    }
}
