use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::RemoteConfig;
use crate::error::{ErrorKind, ServiceError};
use crate::filter::{FindOptions, RuleFilter};
use crate::id::Id;
use crate::service::RULES_PATH;

use super::NotificationRuleStore;
use super::types::{NotificationRule, NotificationRuleCreate, NotificationRuleUpdate};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RulePage {
    #[serde(rename = "notificationRules", default)]
    notification_rules: Vec<NotificationRule>,
}

/// Rule store backed by another server's HTTP API.
pub struct RemoteRuleStore {
    http: Client,
    api_base: String,
    token: String,
}

impl RemoteRuleStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(http, &config.base_url, &config.token))
    }

    pub fn with_client(http: Client, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: format!("{}{RULES_PATH}", base_url.trim_end_matches('/')),
            token: token.into(),
        }
    }

    fn rule_url(&self, id: Id) -> String {
        format!("{}/{id}", self.api_base)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = builder
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await?;
        Err(match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => {
                let kind = ErrorKind::from_str(&error.code).unwrap_or(ErrorKind::Internal);
                ServiceError::from_kind(kind, error.message)
            }
            Err(_) => ServiceError::from_kind(
                kind_for_status(status),
                format!("remote store responded {status}"),
            ),
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = self.send(builder).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Invalid,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        _ => ErrorKind::Internal,
    }
}

#[async_trait]
impl NotificationRuleStore for RemoteRuleStore {
    async fn find_rule_by_id(&self, id: Id) -> Result<NotificationRule, ServiceError> {
        self.send_json(self.http.get(self.rule_url(id))).await
    }

    /// The peer does not report a total, so the count is the page length.
    async fn find_rules(
        &self,
        filter: &RuleFilter,
        opts: &FindOptions,
    ) -> Result<(Vec<NotificationRule>, usize), ServiceError> {
        let mut query = filter.query_pairs();
        query.extend(opts.query_pairs());
        let page: RulePage = self
            .send_json(self.http.get(&self.api_base).query(&query))
            .await?;
        let total = page.notification_rules.len();
        Ok((page.notification_rules, total))
    }

    async fn create_rule(
        &self,
        create: NotificationRuleCreate,
        _user_id: Id,
    ) -> Result<NotificationRule, ServiceError> {
        self.send_json(self.http.post(&self.api_base).json(&create))
            .await
    }

    async fn update_rule(
        &self,
        id: Id,
        mut update: NotificationRuleCreate,
        _user_id: Id,
    ) -> Result<NotificationRule, ServiceError> {
        update.rule.set_id(id);
        self.send_json(self.http.put(self.rule_url(id)).json(&update))
            .await
    }

    async fn patch_rule(
        &self,
        id: Id,
        patch: NotificationRuleUpdate,
    ) -> Result<NotificationRule, ServiceError> {
        self.send_json(self.http.patch(self.rule_url(id)).json(&patch))
            .await
    }

    async fn delete_rule(&self, id: Id) -> Result<(), ServiceError> {
        let response = self.send(self.http.delete(self.rule_url(id))).await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(ServiceError::internal(format!(
                "remote delete responded {} instead of 204",
                response.status()
            )));
        }
        Ok(())
    }
}
