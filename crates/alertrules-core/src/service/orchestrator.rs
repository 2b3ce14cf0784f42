use serde::Deserialize;
use tracing::debug;

use crate::auth::Principal;
use crate::config::ApiConfig;
use crate::error::ServiceError;
use crate::filter::{OrgSelector, RuleFilter, decode_rule_filter};
use crate::id::Id;
use crate::mappings::ResourceType;
use crate::rules::{NotificationRuleCreate, NotificationRuleUpdate};

use super::compose::{ComposedPage, NotificationRuleDocument, ResponseComposer};
use super::label_attach::LabelAttacher;
use super::{Collaborators, decode_body, decode_id};

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(flatten)]
    create: NotificationRuleCreate,
    #[serde(default)]
    labels: Vec<String>,
}

/// Drives every operation on the rule resource. HTTP handlers hand it raw
/// path segments, query pairs and body bytes.
#[derive(Clone)]
pub struct RuleOrchestrator {
    pub(super) deps: Collaborators,
    composer: ResponseComposer,
    attacher: LabelAttacher,
    api: ApiConfig,
}

pub(super) fn require_principal(principal: Option<&Principal>) -> Result<&Principal, ServiceError> {
    principal.ok_or_else(|| ServiceError::unauthorized("authorization is required"))
}

impl RuleOrchestrator {
    pub fn new(deps: Collaborators, api: ApiConfig) -> Self {
        Self {
            composer: ResponseComposer::new(
                deps.tasks.clone(),
                deps.labels.clone(),
                api.list_concurrency,
            ),
            attacher: LabelAttacher::new(deps.labels.clone()),
            deps,
            api,
        }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        body: &[u8],
    ) -> Result<NotificationRuleDocument, ServiceError> {
        let request: CreateRequest = decode_body(body)?;
        let principal = require_principal(principal)?;

        let rule = self
            .deps
            .store
            .create_rule(request.create, principal.user_id)
            .await?;
        let id = rule.id()?;
        let labels = self.attacher.attach_labels(id, &request.labels).await;
        let document = self.composer.compose(rule, labels).await?;

        debug!(rule_id = %id, user_id = %principal.user_id, labels = document.labels.len(), "created notification rule");
        Ok(document)
    }

    pub async fn get(&self, raw_id: &str) -> Result<NotificationRuleDocument, ServiceError> {
        let id = decode_id(raw_id, "id")?;
        let rule = self.deps.store.find_rule_by_id(id).await?;
        let labels = self
            .deps
            .labels
            .find_resource_labels(ResourceType::NotificationRules, id)
            .await?;
        self.composer.compose(rule, labels).await
    }

    pub async fn list(&self, params: &[(String, String)]) -> Result<ComposedPage, ServiceError> {
        let (filter, opts) = decode_rule_filter(params, &self.api)?;
        let resolved = self.resolve_org(&filter).await?;
        let (rules, total) = self.deps.store.find_rules(&resolved, &opts).await?;
        debug!(returned = rules.len(), total, "listing notification rules");
        Ok(self.composer.compose_all(rules, &filter, &opts).await)
    }

    /// Rewrites an organization name selector into an id selector.
    async fn resolve_org(&self, filter: &RuleFilter) -> Result<RuleFilter, ServiceError> {
        let mut resolved = filter.clone();
        if let Some(OrgSelector::Name(name)) = &filter.org {
            let org = self.deps.orgs.find_organization_by_name(name).await?;
            resolved.org = Some(OrgSelector::Id(org.id));
        }
        Ok(resolved)
    }

    pub async fn replace(
        &self,
        principal: Option<&Principal>,
        raw_id: &str,
        body: &[u8],
    ) -> Result<NotificationRuleDocument, ServiceError> {
        let mut update: NotificationRuleCreate = decode_body(body)?;
        let id = decode_id(raw_id, "id")?;
        update.rule.set_id(id);
        let principal = require_principal(principal)?;

        let rule = self
            .deps
            .store
            .update_rule(id, update, principal.user_id)
            .await?;
        let labels = self
            .deps
            .labels
            .find_resource_labels(ResourceType::NotificationRules, id)
            .await?;
        let document = self.composer.compose(rule, labels).await?;

        debug!(rule_id = %id, user_id = %principal.user_id, status = document.status.as_str(), "replaced notification rule");
        Ok(document)
    }

    pub async fn patch(
        &self,
        raw_id: &str,
        body: &[u8],
    ) -> Result<NotificationRuleDocument, ServiceError> {
        let id = decode_id(raw_id, "id")?;
        let update: NotificationRuleUpdate = decode_body(body)?;
        update.validate()?;

        let rule = self.deps.store.patch_rule(id, update.clone()).await?;
        let labels = self
            .deps
            .labels
            .find_resource_labels(ResourceType::NotificationRules, id)
            .await?;
        let document = self.composer.compose(rule, labels).await?;

        debug!(rule_id = %id, changes = ?update, "patched notification rule");
        Ok(document)
    }

    pub async fn delete(&self, raw_id: &str) -> Result<(), ServiceError> {
        let id = decode_id(raw_id, "id")?;
        self.deps.store.delete_rule(id).await?;
        debug!(rule_id = %id, "deleted notification rule");
        Ok(())
    }

    /// Renders the script the rule's task runs. A missing endpoint is an
    /// internal fault; a rule the endpoint cannot serve is invalid.
    pub async fn query(&self, raw_id: &str) -> Result<String, ServiceError> {
        let id = decode_id(raw_id, "id")?;
        let rule = self.deps.store.find_rule_by_id(id).await?;
        let endpoint_id = rule.base().endpoint_id;
        let endpoint = self
            .deps
            .endpoints
            .find_endpoint_by_id(endpoint_id)
            .await
            .map_err(|err| {
                ServiceError::internal(format!(
                    "failed to load endpoint {endpoint_id} of notification rule {id}: {err}"
                ))
            })?;
        rule.render_query(&endpoint)
            .map_err(|err| ServiceError::invalid(err.to_string()))
    }

    pub(super) async fn ensure_rule(&self, raw_id: &str) -> Result<Id, ServiceError> {
        let id = decode_id(raw_id, "id")?;
        self.deps.store.find_rule_by_id(id).await?;
        Ok(id)
    }
}
