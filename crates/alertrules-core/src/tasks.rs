use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};

use crate::db::{Database, now_rfc3339, parse_rfc3339, to_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;
use crate::rules::TaskStatus;

const TASK_COLUMNS: &str = "id, org_id, owner_id, name, status, flux, schedule_every, schedule_offset, latest_completed, latest_scheduled, last_run_status, last_run_error, created_at, updated_at";

/// Scheduled unit backing a notification rule, including its latest run
/// snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: Id,
    pub org_id: Id,
    pub owner_id: Id,
    pub name: String,
    pub status: TaskStatus,
    pub flux: String,
    pub every: Option<String>,
    pub offset: Option<String>,
    pub latest_completed: Option<DateTime<Utc>>,
    pub latest_scheduled: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Definition written whenever a rule is created or rewritten.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub org_id: Id,
    pub owner_id: Id,
    pub name: String,
    pub status: TaskStatus,
    pub flux: String,
    pub every: Option<String>,
    pub offset: Option<String>,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub scheduled_for: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn find_task_by_id(&self, id: Id) -> Result<Task, ServiceError>;
}

#[derive(Clone)]
pub struct TaskRepository {
    db: Database,
}

impl TaskRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records a finished run on the task's snapshot.
    pub async fn record_run(&self, id: Id, run: TaskRun) -> Result<Task, ServiceError> {
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE tasks
                 SET latest_completed = ?2, latest_scheduled = ?3, last_run_status = ?4,
                     last_run_error = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    to_rfc3339(run.completed_at),
                    to_rfc3339(run.scheduled_for),
                    run.status,
                    run.error,
                    now_rfc3339()
                ],
            )
            .await?;
        if updated == 0 {
            return Err(ServiceError::not_found(format!("task {id} not found")));
        }
        self.find_task_by_id(id).await
    }
}

#[async_trait]
impl TaskService for TaskRepository {
    async fn find_task_by_id(&self, id: Id) -> Result<Task, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_task(row),
            None => Err(ServiceError::not_found(format!("task {id} not found"))),
        }
    }
}

pub(crate) async fn insert_task(
    conn: &Connection,
    definition: &TaskDefinition,
) -> Result<Id, ServiceError> {
    let id = Id::generate();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO tasks (id, org_id, owner_id, name, status, flux, schedule_every, schedule_offset, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id.to_string(),
            definition.org_id.to_string(),
            definition.owner_id.to_string(),
            definition.name.clone(),
            definition.status.as_str(),
            definition.flux.clone(),
            definition.every.clone(),
            definition.offset.clone(),
            now
        ],
    )
    .await?;
    Ok(id)
}

/// Rewrites the definition but keeps the run snapshot.
pub(crate) async fn rewrite_task(
    conn: &Connection,
    id: Id,
    definition: &TaskDefinition,
) -> Result<(), ServiceError> {
    let updated = conn
        .execute(
            "UPDATE tasks
             SET name = ?2, status = ?3, flux = ?4, schedule_every = ?5, schedule_offset = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                definition.name.clone(),
                definition.status.as_str(),
                definition.flux.clone(),
                definition.every.clone(),
                definition.offset.clone(),
                now_rfc3339()
            ],
        )
        .await?;
    if updated == 0 {
        return Err(ServiceError::not_found(format!("task {id} not found")));
    }
    Ok(())
}

pub(crate) async fn task_status(conn: &Connection, id: Id) -> Result<TaskStatus, ServiceError> {
    let mut rows = conn
        .query("SELECT status FROM tasks WHERE id = ?1", params![id.to_string()])
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("task {id} not found")))?;
    let status: String = row.get(0)?;
    parse_status(&status)
}

pub(crate) async fn delete_task(conn: &Connection, id: Id) -> Result<(), ServiceError> {
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
        .await?;
    Ok(())
}

fn parse_status(value: &str) -> Result<TaskStatus, ServiceError> {
    TaskStatus::from_str(value)
        .ok_or_else(|| ServiceError::internal(format!("invalid task status {value}")))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, ServiceError> {
    Ok(value.as_deref().map(parse_rfc3339).transpose()?)
}

fn row_to_task(row: Row) -> Result<Task, ServiceError> {
    let id: String = row.get(0)?;
    let org_id: String = row.get(1)?;
    let owner_id: String = row.get(2)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Task {
        id: id.parse()?,
        org_id: org_id.parse()?,
        owner_id: owner_id.parse()?,
        name: row.get(3)?,
        status: parse_status(&status)?,
        flux: row.get(5)?,
        every: row.get(6)?,
        offset: row.get(7)?,
        latest_completed: parse_optional_time(row.get(8)?)?,
        latest_scheduled: parse_optional_time(row.get(9)?)?,
        last_run_status: row.get(10)?,
        last_run_error: row.get(11)?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::orgs::OrganizationRepository;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup() -> (Database, Id, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        let org = OrganizationRepository::new(db.clone())
            .create("acme")
            .await
            .expect("org");
        (db, org.id, dir)
    }

    fn definition(org_id: Id) -> TaskDefinition {
        TaskDefinition {
            org_id,
            owner_id: Id::new(42).unwrap(),
            name: "cpu critical".into(),
            status: TaskStatus::Active,
            flux: "option task = {}".into(),
            every: Some("10m".into()),
            offset: None,
        }
    }

    #[tokio::test]
    async fn new_task_has_empty_run_snapshot() {
        let (db, org_id, _dir) = setup().await;
        let conn = db.connection().await.expect("conn");
        let id = insert_task(&conn, &definition(org_id)).await.expect("insert");

        let task = TaskRepository::new(db).find_task_by_id(id).await.expect("find");
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.every.as_deref(), Some("10m"));
        assert!(task.latest_completed.is_none());
        assert!(task.last_run_status.is_none());
    }

    #[tokio::test]
    async fn recorded_runs_survive_definition_rewrites() {
        let (db, org_id, _dir) = setup().await;
        let conn = db.connection().await.expect("conn");
        let id = insert_task(&conn, &definition(org_id)).await.expect("insert");
        let repo = TaskRepository::new(db.clone());

        let completed = parse_rfc3339("2024-05-01T10:00:05.000Z").unwrap();
        repo.record_run(
            id,
            TaskRun {
                scheduled_for: completed - Duration::seconds(5),
                completed_at: completed,
                status: "failed".into(),
                error: Some("endpoint timeout".into()),
            },
        )
        .await
        .expect("record run");

        let mut rewritten = definition(org_id);
        rewritten.status = TaskStatus::Inactive;
        rewrite_task(&conn, id, &rewritten).await.expect("rewrite");

        let task = repo.find_task_by_id(id).await.expect("find");
        assert_eq!(task.status, TaskStatus::Inactive);
        assert_eq!(task.latest_completed, Some(completed));
        assert_eq!(task.last_run_status.as_deref(), Some("failed"));
        assert_eq!(task.last_run_error.as_deref(), Some("endpoint timeout"));
        assert_eq!(task_status(&conn, id).await.expect("status"), TaskStatus::Inactive);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let (db, _org_id, _dir) = setup().await;
        let repo = TaskRepository::new(db);
        assert!(repo.find_task_by_id(Id::generate()).await.expect_err("missing").is_not_found());
        let run = TaskRun {
            scheduled_for: Utc::now(),
            completed_at: Utc::now(),
            status: "success".into(),
            error: None,
        };
        assert!(repo.record_run(Id::generate(), run).await.expect_err("missing").is_not_found());
    }
}
