use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use libsql::{Connection, Row, params};
use tracing::debug;

use crate::db::{Database, to_rfc3339};
use crate::endpoints::{EndpointRepository, EndpointService, NotificationEndpoint};
use crate::error::ServiceError;
use crate::filter::{FindOptions, OrgSelector, RuleFilter};
use crate::id::Id;
use crate::mappings::{
    ResourceType, UserResourceMapping, UserType, delete_resource_mappings, insert_mapping,
};
use crate::orgs::{OrganizationRepository, OrganizationService};
use crate::tasks::{TaskDefinition, delete_task, insert_task, rewrite_task, task_status};

use super::NotificationRuleStore;
use super::types::{NotificationRule, NotificationRuleCreate, NotificationRuleUpdate, TaskStatus};

const RULE_COLUMNS: &str = "id, org_id, endpoint_id, owner_id, task_id, name, rule_type, rule_json, created_at, updated_at";

/// libsql-backed rule store. Every rule owns one backing task and an owner
/// mapping for its creator, written in the same transaction as the rule.
#[derive(Clone)]
pub struct SqlRuleStore {
    db: Database,
    orgs: OrganizationRepository,
    endpoints: EndpointRepository,
}

impl SqlRuleStore {
    pub fn new(db: Database) -> Self {
        Self {
            orgs: OrganizationRepository::new(db.clone()),
            endpoints: EndpointRepository::new(db.clone()),
            db,
        }
    }

    /// The organization must exist and the endpoint must live in it and
    /// deliver to the same channel family as the rule.
    async fn check_references(
        &self,
        rule: &NotificationRule,
    ) -> Result<NotificationEndpoint, ServiceError> {
        let base = rule.base();
        match self.orgs.find_organization_by_id(base.org_id).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                return Err(ServiceError::invalid(format!(
                    "organization {} does not exist",
                    base.org_id
                )));
            }
            Err(err) => return Err(err),
        }

        let endpoint = match self.endpoints.find_endpoint_by_id(base.endpoint_id).await {
            Ok(endpoint) => endpoint,
            Err(err) if err.is_not_found() => {
                return Err(ServiceError::invalid(format!(
                    "notification endpoint {} does not exist",
                    base.endpoint_id
                )));
            }
            Err(err) => return Err(err),
        };
        if endpoint.org_id != base.org_id {
            return Err(ServiceError::invalid(format!(
                "notification endpoint {} belongs to another organization",
                endpoint.id
            )));
        }
        if endpoint.kind() != rule.kind() {
            return Err(ServiceError::invalid(format!(
                "{} rule cannot target a {} endpoint",
                rule.kind().as_str(),
                endpoint.kind().as_str()
            )));
        }
        Ok(endpoint)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn task_definition(
    rule: &NotificationRule,
    owner_id: Id,
    status: TaskStatus,
    flux: String,
) -> TaskDefinition {
    let base = rule.base();
    TaskDefinition {
        org_id: base.org_id,
        owner_id,
        name: base.name.clone(),
        status,
        flux,
        every: base.every.as_ref().map(|every| every.as_str().to_string()),
        offset: base.offset.as_ref().map(|offset| offset.as_str().to_string()),
    }
}

async fn write_rule(conn: &Connection, rule: &NotificationRule, insert: bool) -> Result<(), ServiceError> {
    let base = rule.base();
    let id = rule.id()?;
    let owner_id = base
        .owner_id
        .ok_or_else(|| ServiceError::internal("notification rule has no owner"))?;
    let task_id = rule.task_id()?;
    let created_at = base
        .created_at
        .ok_or_else(|| ServiceError::internal("notification rule has no creation time"))?;
    let updated_at = base.updated_at.unwrap_or(created_at);

    let sql = if insert {
        format!(
            "INSERT INTO notification_rules ({RULE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        )
    } else {
        "UPDATE notification_rules
         SET org_id = ?2, endpoint_id = ?3, owner_id = ?4, task_id = ?5, name = ?6,
             rule_type = ?7, rule_json = ?8, created_at = ?9, updated_at = ?10
         WHERE id = ?1"
            .to_string()
    };

    let written = conn
        .execute(
            &sql,
            params![
                id.to_string(),
                base.org_id.to_string(),
                base.endpoint_id.to_string(),
                owner_id.to_string(),
                task_id.to_string(),
                base.name.clone(),
                rule.kind().as_str(),
                serde_json::to_string(rule)?,
                to_rfc3339(created_at),
                to_rfc3339(updated_at)
            ],
        )
        .await?;
    if written == 0 {
        return Err(ServiceError::not_found(format!("notification rule {id} not found")));
    }
    Ok(())
}

fn row_to_rule(row: Row) -> Result<NotificationRule, ServiceError> {
    let rule_json: String = row.get(7)?;
    Ok(serde_json::from_str(&rule_json)?)
}

fn compare_rules(sort_by: Option<&str>, a: &NotificationRule, b: &NotificationRule) -> Ordering {
    let (a_base, b_base) = (a.base(), b.base());
    let primary = match sort_by {
        Some("name") => a_base.name.cmp(&b_base.name),
        Some("createdAt") => a_base.created_at.cmp(&b_base.created_at),
        Some("updatedAt") => a_base.updated_at.cmp(&b_base.updated_at),
        _ => Ordering::Equal,
    };
    primary.then_with(|| a_base.id.cmp(&b_base.id))
}

#[async_trait]
impl NotificationRuleStore for SqlRuleStore {
    async fn find_rule_by_id(&self, id: Id) -> Result<NotificationRule, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM notification_rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_rule(row),
            None => Err(ServiceError::not_found(format!(
                "notification rule {id} not found"
            ))),
        }
    }

    async fn find_rules(
        &self,
        filter: &RuleFilter,
        opts: &FindOptions,
    ) -> Result<(Vec<NotificationRule>, usize), ServiceError> {
        let (org_id, org_name) = match &filter.org {
            Some(OrgSelector::Id(id)) => (Some(id.to_string()), None),
            Some(OrgSelector::Name(name)) => (None, Some(name.clone())),
            None => (None, None),
        };
        let urm = &filter.user_mapping;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM notification_rules
                     WHERE (?1 IS NULL OR org_id = ?1)
                       AND (?2 IS NULL OR org_id IN (SELECT id FROM organizations WHERE name = ?2))
                       AND (?3 = 0 OR id IN (
                             SELECT resource_id FROM user_resource_mappings
                             WHERE resource_type = ?4
                               AND (?5 IS NULL OR resource_id = ?5)
                               AND (?6 IS NULL OR user_id = ?6)
                               AND (?7 IS NULL OR user_type = ?7)))"
                ),
                params![
                    org_id,
                    org_name,
                    i64::from(!urm.is_unrestricted()),
                    urm.resource_type.as_str(),
                    urm.resource_id.map(|id| id.to_string()),
                    urm.user_id.map(|id| id.to_string()),
                    urm.user_type.map(|t| t.as_str())
                ],
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            let rule = row_to_rule(row)?;
            if filter.matches_tags(&rule) {
                rules.push(rule);
            }
        }

        rules.sort_by(|a, b| compare_rules(opts.sort_by.as_deref(), a, b));
        if opts.descending {
            rules.reverse();
        }
        let total = rules.len();

        let start = match opts.after {
            Some(after) => rules
                .iter()
                .position(|rule| rule.base().id == Some(after))
                .map_or(0, |pos| pos + 1),
            None => 0,
        };
        let page = rules
            .into_iter()
            .skip(start.saturating_add(opts.offset))
            .take(opts.limit)
            .collect();
        Ok((page, total))
    }

    async fn create_rule(
        &self,
        create: NotificationRuleCreate,
        user_id: Id,
    ) -> Result<NotificationRule, ServiceError> {
        let NotificationRuleCreate { mut rule, status } = create;
        rule.validate()?;
        let endpoint = self.check_references(&rule).await?;

        let id = Id::generate();
        let created_at = now();
        {
            let base = rule.base_mut();
            base.id = Some(id);
            base.owner_id = Some(user_id);
            base.task_id = None;
            base.created_at = Some(created_at);
            base.updated_at = Some(created_at);
        }
        let flux = rule.render_query(&endpoint)?;

        let conn = self.db.connection().await?;
        let tx = conn.transaction().await?;
        let task_id = insert_task(&tx, &task_definition(&rule, user_id, status, flux)).await?;
        rule.base_mut().task_id = Some(task_id);
        write_rule(&tx, &rule, true).await?;
        insert_mapping(
            &tx,
            &UserResourceMapping {
                resource_type: ResourceType::NotificationRules,
                resource_id: id,
                user_id,
                user_type: UserType::Owner,
            },
        )
        .await?;
        tx.commit().await?;

        debug!(rule_id = %id, task_id = %task_id, user_id = %user_id, "notification rule created");
        Ok(rule)
    }

    async fn update_rule(
        &self,
        id: Id,
        update: NotificationRuleCreate,
        user_id: Id,
    ) -> Result<NotificationRule, ServiceError> {
        let NotificationRuleCreate { mut rule, status } = update;
        rule.validate()?;
        let current = self.find_rule_by_id(id).await?;
        let current_base = current.base();
        if rule.base().org_id != current_base.org_id {
            return Err(ServiceError::invalid(
                "notification rule organization cannot be changed",
            ));
        }
        if rule.base().endpoint_id != current_base.endpoint_id {
            return Err(ServiceError::invalid(
                "notification rule endpoint cannot be changed on replace",
            ));
        }
        let endpoint = self.check_references(&rule).await?;

        let owner_id = current_base
            .owner_id
            .ok_or_else(|| ServiceError::internal("notification rule has no owner"))?;
        let task_id = current.task_id()?;
        {
            let base = rule.base_mut();
            base.id = Some(id);
            base.owner_id = Some(owner_id);
            base.task_id = Some(task_id);
            base.created_at = current_base.created_at;
            base.updated_at = Some(now());
        }
        let flux = rule.render_query(&endpoint)?;

        let conn = self.db.connection().await?;
        let tx = conn.transaction().await?;
        rewrite_task(&tx, task_id, &task_definition(&rule, owner_id, status, flux)).await?;
        write_rule(&tx, &rule, false).await?;
        tx.commit().await?;

        debug!(rule_id = %id, user_id = %user_id, status = status.as_str(), "notification rule replaced");
        Ok(rule)
    }

    async fn patch_rule(
        &self,
        id: Id,
        patch: NotificationRuleUpdate,
    ) -> Result<NotificationRule, ServiceError> {
        patch.validate()?;
        let mut rule = self.find_rule_by_id(id).await?;
        if patch.is_empty() {
            return Ok(rule);
        }

        let requested_status = patch.apply(rule.base_mut());
        rule.validate()?;
        let endpoint = self.check_references(&rule).await?;
        rule.base_mut().updated_at = Some(now());
        let flux = rule.render_query(&endpoint)?;

        let task_id = rule.task_id()?;
        let owner_id = rule
            .base()
            .owner_id
            .ok_or_else(|| ServiceError::internal("notification rule has no owner"))?;

        let conn = self.db.connection().await?;
        let tx = conn.transaction().await?;
        let status = match requested_status {
            Some(status) => status,
            None => task_status(&tx, task_id).await?,
        };
        rewrite_task(&tx, task_id, &task_definition(&rule, owner_id, status, flux)).await?;
        write_rule(&tx, &rule, false).await?;
        tx.commit().await?;

        debug!(rule_id = %id, status = status.as_str(), "notification rule patched");
        Ok(rule)
    }

    async fn delete_rule(&self, id: Id) -> Result<(), ServiceError> {
        let rule = self.find_rule_by_id(id).await?;
        let task_id = rule.task_id()?;

        let conn = self.db.connection().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM notification_rules WHERE id = ?1",
            params![id.to_string()],
        )
        .await?;
        delete_task(&tx, task_id).await?;
        delete_resource_mappings(&tx, ResourceType::NotificationRules, id).await?;
        tx.commit().await?;

        debug!(rule_id = %id, task_id = %task_id, "notification rule deleted");
        Ok(())
    }
}
