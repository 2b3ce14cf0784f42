use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::Serialize;

use crate::db::{Database, now_rfc3339, parse_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;

const ORG_COLUMNS: &str = "id, name, created_at";
const USER_COLUMNS: &str = "id, name, status, created_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Whether a user account may act on resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub status: UserStatus,
}

#[async_trait]
pub trait OrganizationService: Send + Sync {
    async fn find_organization_by_id(&self, id: Id) -> Result<Organization, ServiceError>;
    async fn find_organization_by_name(&self, name: &str) -> Result<Organization, ServiceError>;
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn find_user_by_id(&self, id: Id) -> Result<User, ServiceError>;
}

#[derive(Clone)]
pub struct OrganizationRepository {
    db: Database,
}

impl OrganizationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str) -> Result<Organization, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::invalid("organization name is required"));
        }
        let id = Id::generate();
        let conn = self.db.connection().await?;
        let inserted = conn
            .execute(
                &format!("INSERT INTO organizations ({ORG_COLUMNS}) VALUES (?1, ?2, ?3)"),
                params![id.to_string(), name, now_rfc3339()],
            )
            .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(ServiceError::Conflict(format!(
                    "organization {name:?} already exists"
                )));
            }
            Err(err) => return Err(err.into()),
        }

        self.find_organization_by_id(id).await
    }

    async fn find_one(&self, clause: &str, value: String) -> Result<Option<Organization>, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE {clause} = ?1"),
                params![value],
            )
            .await?;
        rows.next().await?.map(row_to_org).transpose()
    }
}

#[async_trait]
impl OrganizationService for OrganizationRepository {
    async fn find_organization_by_id(&self, id: Id) -> Result<Organization, ServiceError> {
        self.find_one("id", id.to_string())
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("organization {id} not found")))
    }

    async fn find_organization_by_name(&self, name: &str) -> Result<Organization, ServiceError> {
        self.find_one("name", name.to_string())
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("organization name {name:?} not found")))
    }
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str) -> Result<User, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::invalid("user name is required"));
        }
        let id = Id::generate();
        let conn = self.db.connection().await?;
        let inserted = conn
            .execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, 'active', ?3)"),
                params![id.to_string(), name, now_rfc3339()],
            )
            .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(ServiceError::Conflict(format!("user {name:?} already exists")));
            }
            Err(err) => return Err(err.into()),
        }

        self.find_user_by_id(id).await
    }

    pub async fn set_status(&self, id: Id, status: UserStatus) -> Result<User, ServiceError> {
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE users SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(ServiceError::not_found(format!("user {id} not found")));
        }
        self.find_user_by_id(id).await
    }
}

#[async_trait]
impl UserService for UserRepository {
    async fn find_user_by_id(&self, id: Id) -> Result<User, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(ServiceError::not_found(format!("user {id} not found"))),
        }
    }
}

pub(crate) fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn row_to_org(row: Row) -> Result<Organization, ServiceError> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    Ok(Organization {
        id: id.parse()?,
        name: row.get(1)?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn row_to_user(row: Row) -> Result<User, ServiceError> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    Ok(User {
        id: id.parse()?,
        name: row.get(1)?,
        status: UserStatus::from_str(&status)
            .ok_or_else(|| ServiceError::internal(format!("invalid user status {status}")))?,
    })
}
