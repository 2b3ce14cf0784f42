use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};

use crate::db::{Database, now_rfc3339, parse_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;

const ENDPOINT_COLUMNS: &str = "id, org_id, name, endpoint_type, config_json, created_at, updated_at";

/// Delivery channel family shared by endpoints and the rules that target them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    PagerDuty,
    Http,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Slack => "slack",
            ChannelKind::PagerDuty => "pagerduty",
            ChannelKind::Http => "http",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "slack" => Some(Self::Slack),
            "pagerduty" => Some(Self::PagerDuty),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Reference to a value held in the secret store. Only the key is ever
/// persisted or rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthMethod {
    #[default]
    None,
    Basic,
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EndpointConfig {
    #[serde(rename = "slack")]
    Slack {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<SecretRef>,
    },
    #[serde(rename = "pagerduty")]
    PagerDuty {
        #[serde(rename = "clientURL")]
        client_url: String,
        #[serde(rename = "routingKey")]
        routing_key: SecretRef,
    },
    #[serde(rename = "http")]
    Http {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(rename = "authMethod", default)]
        auth_method: HttpAuthMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<SecretRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<SecretRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<SecretRef>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl EndpointConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            EndpointConfig::Slack { .. } => ChannelKind::Slack,
            EndpointConfig::PagerDuty { .. } => ChannelKind::PagerDuty,
            EndpointConfig::Http { .. } => ChannelKind::Http,
        }
    }

    /// Rewrites every secret reference to a key scoped to `id`.
    fn scope_secret_keys(&mut self, id: Id) {
        let scoped = |field: &str| SecretRef {
            key: format!("{id}-{field}"),
        };
        match self {
            EndpointConfig::Slack { token, .. } => {
                if token.is_some() {
                    *token = Some(scoped("token"));
                }
            }
            EndpointConfig::PagerDuty { routing_key, .. } => *routing_key = scoped("routing-key"),
            EndpointConfig::Http {
                username,
                password,
                token,
                ..
            } => {
                for (slot, field) in [(username, "username"), (password, "password"), (token, "token")]
                {
                    if slot.is_some() {
                        *slot = Some(scoped(field));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEndpoint {
    pub id: Id,
    #[serde(rename = "orgID")]
    pub org_id: Id,
    pub name: String,
    #[serde(flatten)]
    pub config: EndpointConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationEndpoint {
    pub fn kind(&self) -> ChannelKind {
        self.config.kind()
    }
}

#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub org_id: Id,
    pub name: String,
    pub config: EndpointConfig,
}

#[async_trait]
pub trait EndpointService: Send + Sync {
    async fn find_endpoint_by_id(&self, id: Id) -> Result<NotificationEndpoint, ServiceError>;
}

#[derive(Clone)]
pub struct EndpointRepository {
    db: Database,
}

impl EndpointRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_endpoint: NewEndpoint) -> Result<NotificationEndpoint, ServiceError> {
        let NewEndpoint {
            org_id,
            name,
            mut config,
        } = new_endpoint;
        if name.trim().is_empty() {
            return Err(ServiceError::invalid("endpoint name is required"));
        }

        let id = Id::generate();
        config.scope_secret_keys(id);
        let now = now_rfc3339();
        let config_json = serde_json::to_string(&config)?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO notification_endpoints ({ENDPOINT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     RETURNING {ENDPOINT_COLUMNS}"
                ),
                params![
                    id.to_string(),
                    org_id.to_string(),
                    name,
                    config.kind().as_str(),
                    config_json,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_endpoint(row),
            None => Err(ServiceError::internal("endpoint insert returned no row")),
        }
    }
}

#[async_trait]
impl EndpointService for EndpointRepository {
    async fn find_endpoint_by_id(&self, id: Id) -> Result<NotificationEndpoint, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ENDPOINT_COLUMNS} FROM notification_endpoints WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_endpoint(row),
            None => Err(ServiceError::not_found(format!(
                "notification endpoint {id} not found"
            ))),
        }
    }
}

fn row_to_endpoint(row: Row) -> Result<NotificationEndpoint, ServiceError> {
    let id: String = row.get(0)?;
    let org_id: String = row.get(1)?;
    let config_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(NotificationEndpoint {
        id: id.parse()?,
        org_id: org_id.parse()?,
        name: row.get(2)?,
        config: serde_json::from_str(&config_json)?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}
