//! Member, owner and label sub-resources of a rule.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Principal;
use crate::error::ServiceError;
use crate::id::Id;
use crate::labels::{Label, LabelMapping};
use crate::mappings::{ResourceType, UserResourceMapping, UserResourceMappingFilter, UserType};
use crate::orgs::UserStatus;

use super::compose::RULES_PATH;
use super::orchestrator::{RuleOrchestrator, require_principal};
use super::{decode_body, decode_id};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfLink {
    #[serde(rename = "self")]
    pub self_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceMember {
    pub id: Id,
    pub name: String,
    pub status: UserStatus,
    pub role: UserType,
    pub links: SelfLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberList {
    pub links: SelfLink,
    pub users: Vec<ResourceMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelList {
    pub links: SelfLink,
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelResponse {
    pub label: Label,
    pub links: SelfLink,
}

#[derive(Debug, Deserialize)]
struct MemberRequest {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LabelRequest {
    #[serde(rename = "labelID")]
    label_id: String,
}

fn collection(user_type: UserType) -> &'static str {
    match user_type {
        UserType::Owner => "owners",
        UserType::Member => "members",
    }
}

fn user_link(id: Id) -> SelfLink {
    SelfLink {
        self_link: format!("/api/v2/users/{id}"),
    }
}

impl RuleOrchestrator {
    pub async fn list_members(
        &self,
        raw_id: &str,
        user_type: UserType,
    ) -> Result<MemberList, ServiceError> {
        let id = self.ensure_rule(raw_id).await?;
        let mappings = self
            .deps
            .mappings
            .find_mappings(&UserResourceMappingFilter {
                resource_id: Some(id),
                user_type: Some(user_type),
                ..UserResourceMappingFilter::for_type(ResourceType::NotificationRules)
            })
            .await?;

        let mut users = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let user = self.deps.users.find_user_by_id(mapping.user_id).await?;
            users.push(ResourceMember {
                links: user_link(user.id),
                id: user.id,
                name: user.name,
                status: user.status,
                role: mapping.user_type,
            });
        }

        Ok(MemberList {
            links: SelfLink {
                self_link: format!("{RULES_PATH}/{id}/{}", collection(user_type)),
            },
            users,
        })
    }

    pub async fn add_member(
        &self,
        principal: Option<&Principal>,
        raw_id: &str,
        user_type: UserType,
        body: &[u8],
    ) -> Result<ResourceMember, ServiceError> {
        let request: MemberRequest = decode_body(body)?;
        let id = self.ensure_rule(raw_id).await?;
        let user_id = decode_id(&request.id, "user id")?;
        let principal = require_principal(principal)?;

        let user = self.deps.users.find_user_by_id(user_id).await?;
        self.deps
            .mappings
            .create_mapping(&UserResourceMapping {
                resource_type: ResourceType::NotificationRules,
                resource_id: id,
                user_id,
                user_type,
            })
            .await?;

        debug!(rule_id = %id, user_id = %user_id, role = user_type.as_str(), added_by = %principal.user_id, "added notification rule user");
        Ok(ResourceMember {
            links: user_link(user.id),
            id: user.id,
            name: user.name,
            status: user.status,
            role: user_type,
        })
    }

    pub async fn remove_member(
        &self,
        raw_id: &str,
        raw_user_id: &str,
        user_type: UserType,
    ) -> Result<(), ServiceError> {
        let id = decode_id(raw_id, "id")?;
        let user_id = decode_id(raw_user_id, "user id")?;
        let existing = self
            .deps
            .mappings
            .find_mappings(&UserResourceMappingFilter {
                resource_id: Some(id),
                user_id: Some(user_id),
                user_type: Some(user_type),
                ..UserResourceMappingFilter::for_type(ResourceType::NotificationRules)
            })
            .await?;
        if existing.is_empty() {
            return Err(ServiceError::not_found(format!(
                "user {user_id} is not one of the {} of notification rule {id}",
                collection(user_type)
            )));
        }
        self.deps.mappings.delete_mapping(id, user_id).await?;
        debug!(rule_id = %id, user_id = %user_id, role = user_type.as_str(), "removed notification rule user");
        Ok(())
    }

    pub async fn list_labels(&self, raw_id: &str) -> Result<LabelList, ServiceError> {
        let id = self.ensure_rule(raw_id).await?;
        let labels = self
            .deps
            .labels
            .find_resource_labels(ResourceType::NotificationRules, id)
            .await?;
        Ok(LabelList {
            links: SelfLink {
                self_link: format!("{RULES_PATH}/{id}/labels"),
            },
            labels,
        })
    }

    pub async fn add_label(
        &self,
        principal: Option<&Principal>,
        raw_id: &str,
        body: &[u8],
    ) -> Result<LabelResponse, ServiceError> {
        let request: LabelRequest = decode_body(body)?;
        let id = self.ensure_rule(raw_id).await?;
        let label_id = decode_id(&request.label_id, "labelID")?;
        let principal = require_principal(principal)?;

        let mapping = LabelMapping {
            label_id,
            resource_id: id,
            resource_type: ResourceType::NotificationRules,
        };
        self.deps.labels.create_label_mapping(&mapping).await?;
        let label = self.deps.labels.find_label_by_id(label_id).await?;

        debug!(rule_id = %id, label_id = %label_id, added_by = %principal.user_id, "labelled notification rule");
        Ok(LabelResponse {
            links: SelfLink {
                self_link: format!("/api/v2/labels/{label_id}"),
            },
            label,
        })
    }

    pub async fn remove_label(&self, raw_id: &str, raw_label_id: &str) -> Result<(), ServiceError> {
        let id = decode_id(raw_id, "id")?;
        let label_id = decode_id(raw_label_id, "label id")?;
        self.deps
            .labels
            .delete_label_mapping(&LabelMapping {
                label_id,
                resource_id: id,
                resource_type: ResourceType::NotificationRules,
            })
            .await?;
        debug!(rule_id = %id, label_id = %label_id, "unlabelled notification rule");
        Ok(())
    }
}
