use std::collections::BTreeMap;

use async_trait::async_trait;
use libsql::{Row, params};
use serde::{Deserialize, Serialize};

use crate::db::{Database, now_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;
use crate::mappings::ResourceType;
use crate::orgs::is_unique_violation;

const LABEL_COLUMNS: &str = "labels.id, labels.org_id, labels.name, labels.properties_json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: Id,
    #[serde(rename = "orgID")]
    pub org_id: Id,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NewLabel {
    pub org_id: Id,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

/// Junction row attaching a label to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMapping {
    pub label_id: Id,
    pub resource_id: Id,
    pub resource_type: ResourceType,
}

#[async_trait]
pub trait LabelService: Send + Sync {
    async fn find_label_by_id(&self, id: Id) -> Result<Label, ServiceError>;
    async fn find_resource_labels(
        &self,
        resource_type: ResourceType,
        resource_id: Id,
    ) -> Result<Vec<Label>, ServiceError>;
    async fn create_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError>;
    async fn delete_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct LabelRepository {
    db: Database,
}

impl LabelRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_label: NewLabel) -> Result<Label, ServiceError> {
        let NewLabel {
            org_id,
            name,
            properties,
        } = new_label;
        if name.trim().is_empty() {
            return Err(ServiceError::invalid("label name is required"));
        }

        let id = Id::generate();
        let conn = self.db.connection().await?;
        let inserted = conn
            .execute(
                "INSERT INTO labels (id, org_id, name, properties_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    org_id.to_string(),
                    name.clone(),
                    serde_json::to_string(&properties)?,
                    now_rfc3339()
                ],
            )
            .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(ServiceError::Conflict(format!("label {name:?} already exists")));
            }
            Err(err) => return Err(err.into()),
        }

        self.find_label_by_id(id).await
    }
}

#[async_trait]
impl LabelService for LabelRepository {
    async fn find_label_by_id(&self, id: Id) -> Result<Label, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE labels.id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_label(row),
            None => Err(ServiceError::not_found(format!("label {id} not found"))),
        }
    }

    async fn find_resource_labels(
        &self,
        resource_type: ResourceType,
        resource_id: Id,
    ) -> Result<Vec<Label>, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LABEL_COLUMNS} FROM labels
                     JOIN label_mappings ON label_mappings.label_id = labels.id
                     WHERE label_mappings.resource_type = ?1 AND label_mappings.resource_id = ?2
                     ORDER BY labels.name"
                ),
                params![resource_type.as_str(), resource_id.to_string()],
            )
            .await?;

        let mut labels = Vec::new();
        while let Some(row) = rows.next().await? {
            labels.push(row_to_label(row)?);
        }
        Ok(labels)
    }

    async fn create_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError> {
        self.find_label_by_id(mapping.label_id).await?;
        let conn = self.db.connection().await?;
        let inserted = conn
            .execute(
                "INSERT INTO label_mappings (label_id, resource_type, resource_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    mapping.label_id.to_string(),
                    mapping.resource_type.as_str(),
                    mapping.resource_id.to_string(),
                    now_rfc3339()
                ],
            )
            .await;
        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ServiceError::Conflict(format!(
                "label {} is already attached to {}",
                mapping.label_id, mapping.resource_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError> {
        let conn = self.db.connection().await?;
        let deleted = conn
            .execute(
                "DELETE FROM label_mappings
                 WHERE label_id = ?1 AND resource_type = ?2 AND resource_id = ?3",
                params![
                    mapping.label_id.to_string(),
                    mapping.resource_type.as_str(),
                    mapping.resource_id.to_string()
                ],
            )
            .await?;
        if deleted == 0 {
            return Err(ServiceError::not_found(format!(
                "label {} is not attached to {}",
                mapping.label_id, mapping.resource_id
            )));
        }
        Ok(())
    }
}

fn row_to_label(row: Row) -> Result<Label, ServiceError> {
    let id: String = row.get(0)?;
    let org_id: String = row.get(1)?;
    let properties: String = row.get(3)?;
    Ok(Label {
        id: id.parse()?,
        org_id: org_id.parse()?,
        name: row.get(2)?,
        properties: serde_json::from_str(&properties)?,
    })
}
