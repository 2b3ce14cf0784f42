use async_trait::async_trait;
use libsql::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::db::{Database, now_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;
use crate::orgs::is_unique_violation;

const MAPPING_COLUMNS: &str = "resource_type, resource_id, user_id, user_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "notificationRules")]
    NotificationRules,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::NotificationRules => "notificationRules",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "notificationRules" => Some(Self::NotificationRules),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Owner,
    Member,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Owner => "owner",
            UserType::Member => "member",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResourceMapping {
    #[serde(rename = "resourceType")]
    pub resource_type: ResourceType,
    #[serde(rename = "resourceID")]
    pub resource_id: Id,
    #[serde(rename = "userID")]
    pub user_id: Id,
    pub user_type: UserType,
}

/// Restricts a lookup to mappings of one resource type, optionally narrowed
/// to a resource, a user or a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResourceMappingFilter {
    pub resource_type: ResourceType,
    pub resource_id: Option<Id>,
    pub user_id: Option<Id>,
    pub user_type: Option<UserType>,
}

impl UserResourceMappingFilter {
    pub fn for_type(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            resource_id: None,
            user_id: None,
            user_type: None,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.resource_id.is_none() && self.user_id.is_none() && self.user_type.is_none()
    }
}

#[async_trait]
pub trait UserResourceMappingService: Send + Sync {
    async fn find_mappings(
        &self,
        filter: &UserResourceMappingFilter,
    ) -> Result<Vec<UserResourceMapping>, ServiceError>;
    async fn create_mapping(&self, mapping: &UserResourceMapping) -> Result<(), ServiceError>;
    async fn delete_mapping(&self, resource_id: Id, user_id: Id) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct MappingRepository {
    db: Database,
}

impl MappingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserResourceMappingService for MappingRepository {
    async fn find_mappings(
        &self,
        filter: &UserResourceMappingFilter,
    ) -> Result<Vec<UserResourceMapping>, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAPPING_COLUMNS} FROM user_resource_mappings
                     WHERE resource_type = ?1
                       AND (?2 IS NULL OR resource_id = ?2)
                       AND (?3 IS NULL OR user_id = ?3)
                       AND (?4 IS NULL OR user_type = ?4)
                     ORDER BY created_at, user_id"
                ),
                params![
                    filter.resource_type.as_str(),
                    filter.resource_id.map(|id| id.to_string()),
                    filter.user_id.map(|id| id.to_string()),
                    filter.user_type.map(|t| t.as_str())
                ],
            )
            .await?;

        let mut mappings = Vec::new();
        while let Some(row) = rows.next().await? {
            mappings.push(row_to_mapping(row)?);
        }
        Ok(mappings)
    }

    async fn create_mapping(&self, mapping: &UserResourceMapping) -> Result<(), ServiceError> {
        let conn = self.db.connection().await?;
        insert_mapping(&conn, mapping).await
    }

    async fn delete_mapping(&self, resource_id: Id, user_id: Id) -> Result<(), ServiceError> {
        let conn = self.db.connection().await?;
        let deleted = conn
            .execute(
                "DELETE FROM user_resource_mappings WHERE resource_id = ?1 AND user_id = ?2",
                params![resource_id.to_string(), user_id.to_string()],
            )
            .await?;
        if deleted == 0 {
            return Err(ServiceError::not_found(format!(
                "user {user_id} is not mapped to {resource_id}"
            )));
        }
        Ok(())
    }
}

pub(crate) async fn insert_mapping(
    conn: &Connection,
    mapping: &UserResourceMapping,
) -> Result<(), ServiceError> {
    let inserted = conn
        .execute(
            &format!(
                "INSERT INTO user_resource_mappings ({MAPPING_COLUMNS}, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                mapping.resource_type.as_str(),
                mapping.resource_id.to_string(),
                mapping.user_id.to_string(),
                mapping.user_type.as_str(),
                now_rfc3339()
            ],
        )
        .await;
    match inserted {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(ServiceError::Conflict(format!(
            "user {} is already mapped to {}",
            mapping.user_id, mapping.resource_id
        ))),
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn delete_resource_mappings(
    conn: &Connection,
    resource_type: ResourceType,
    resource_id: Id,
) -> Result<(), ServiceError> {
    conn.execute(
        "DELETE FROM user_resource_mappings WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource_type.as_str(), resource_id.to_string()],
    )
    .await?;
    Ok(())
}

fn row_to_mapping(row: Row) -> Result<UserResourceMapping, ServiceError> {
    let resource_type: String = row.get(0)?;
    let resource_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let user_type: String = row.get(3)?;
    Ok(UserResourceMapping {
        resource_type: ResourceType::from_str(&resource_type).ok_or_else(|| {
            ServiceError::internal(format!("unknown resource type {resource_type}"))
        })?,
        resource_id: resource_id.parse()?,
        user_id: user_id.parse()?,
        user_type: UserType::from_str(&user_type)
            .ok_or_else(|| ServiceError::internal(format!("unknown user type {user_type}")))?,
    })
}
