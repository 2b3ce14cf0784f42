use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::duration::ScheduleDuration;
use crate::endpoints::ChannelKind;
use crate::error::ServiceError;
use crate::id::Id;

/// Run state of the task backing a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Active,
    Inactive,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Inactive => "inactive",
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckLevel {
    Unknown,
    Ok,
    Info,
    Crit,
    Warn,
    Any,
}

impl CheckLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckLevel::Unknown => "UNKNOWN",
            CheckLevel::Ok => "OK",
            CheckLevel::Info => "INFO",
            CheckLevel::Crit => "CRIT",
            CheckLevel::Warn => "WARN",
            CheckLevel::Any => "ANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagOperator {
    Equal,
    NotEqual,
    EqualRegex,
    NotEqualRegex,
}

impl TagOperator {
    pub fn is_regex(&self) -> bool {
        matches!(self, TagOperator::EqualRegex | TagOperator::NotEqualRegex)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub key: String,
    pub value: String,
    pub operator: TagOperator,
}

impl TagRule {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.key.trim().is_empty() {
            return Err(ServiceError::invalid("tag rule key is empty"));
        }
        if self.operator.is_regex() {
            Regex::new(&self.value).map_err(|err| {
                ServiceError::invalid(format!("tag rule {:?} has an invalid pattern: {err}", self.key))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRule {
    #[serde(alias = "level")]
    pub current_level: CheckLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_level: Option<CheckLevel>,
    #[serde(default)]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<ScheduleDuration>,
}

/// Fields shared by every rule variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "endpointID")]
    pub endpoint_id: Id,
    #[serde(rename = "orgID")]
    pub org_id: Id,
    #[serde(rename = "ownerID", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Id>,
    #[serde(rename = "taskID", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<ScheduleDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<ScheduleDuration>,
    #[serde(default)]
    pub runbook_link: String,
    #[serde(default)]
    pub tag_rules: Vec<TagRule>,
    #[serde(default)]
    pub status_rules: Vec<StatusRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_every: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RuleBase {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::invalid("notification rule name is required"));
        }
        if self.every.is_none() {
            return Err(ServiceError::invalid("notification rule every is required"));
        }
        for tag in &self.tag_rules {
            tag.validate()?;
        }
        validate_limits(self.limit, self.limit_every)
    }
}

fn validate_limits(limit: Option<i32>, limit_every: Option<i32>) -> Result<(), ServiceError> {
    match (limit, limit_every) {
        (None, None) => Ok(()),
        (Some(limit), Some(every)) if limit > 0 && every > 0 => Ok(()),
        (Some(_), Some(_)) => Err(ServiceError::invalid(
            "limit and limitEvery must be positive",
        )),
        _ => Err(ServiceError::invalid(
            "limit and limitEvery must be set together",
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackRule {
    #[serde(flatten)]
    pub base: RuleBase,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub message_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyRule {
    #[serde(flatten)]
    pub base: RuleBase,
    #[serde(default)]
    pub message_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRule {
    #[serde(flatten)]
    pub base: RuleBase,
}

/// A notification rule, discriminated on its `type` field by the channel
/// family it delivers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationRule {
    #[serde(rename = "slack")]
    Slack(SlackRule),
    #[serde(rename = "pagerduty")]
    PagerDuty(PagerDutyRule),
    #[serde(rename = "http")]
    Http(HttpRule),
}

impl NotificationRule {
    pub fn base(&self) -> &RuleBase {
        match self {
            NotificationRule::Slack(rule) => &rule.base,
            NotificationRule::PagerDuty(rule) => &rule.base,
            NotificationRule::Http(rule) => &rule.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut RuleBase {
        match self {
            NotificationRule::Slack(rule) => &mut rule.base,
            NotificationRule::PagerDuty(rule) => &mut rule.base,
            NotificationRule::Http(rule) => &mut rule.base,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            NotificationRule::Slack(_) => ChannelKind::Slack,
            NotificationRule::PagerDuty(_) => ChannelKind::PagerDuty,
            NotificationRule::Http(_) => ChannelKind::Http,
        }
    }

    /// Server-assigned id. Stored rules always carry one.
    pub fn id(&self) -> Result<Id, ServiceError> {
        self.base()
            .id
            .ok_or_else(|| ServiceError::internal("notification rule has no id"))
    }

    pub fn set_id(&mut self, id: Id) {
        self.base_mut().id = Some(id);
    }

    pub fn task_id(&self) -> Result<Id, ServiceError> {
        self.base()
            .task_id
            .ok_or_else(|| ServiceError::internal("notification rule has no task"))
    }

    /// Drops fields that must never leave the server.
    pub fn clear_private_data(&mut self) {
        self.base_mut().task_id = None;
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        self.base().validate()
    }
}

/// Body of a create or full replace: a rule definition plus the desired
/// status of its backing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRuleCreate {
    #[serde(flatten)]
    pub rule: NotificationRule,
    #[serde(default)]
    pub status: TaskStatus,
}

mod nullable {
    use serde::{Deserialize, Deserializer};

    /// Absent stays `None`, explicit null becomes `Some(None)`.
    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }
}

/// Sparse changeset applied by a patch. Unrecognised fields are ignored.
///
/// Clearable fields use `Option<Option<T>>`: absent keeps the stored value,
/// `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRuleUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<ScheduleDuration>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub offset: Option<Option<ScheduleDuration>>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub sleep_until: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub runbook_link: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_rules: Option<Vec<TagRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_rules: Option<Vec<StatusRule>>,
    #[serde(rename = "endpointID", default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<Id>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub limit_every: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub limit: Option<Option<i32>>,
}

impl NotificationRuleUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Structural checks that do not need the stored rule.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ServiceError::invalid("notification rule name cannot be empty"));
            }
        }
        if let Some(tags) = &self.tag_rules {
            for tag in tags {
                tag.validate()?;
            }
        }
        match (self.limit, self.limit_every) {
            (None, None) => Ok(()),
            (Some(limit), Some(every)) => validate_limits(limit, every),
            _ => Err(ServiceError::invalid(
                "limit and limitEvery must be patched together",
            )),
        }
    }

    /// Applies the set fields onto `base`. Returns the requested task status,
    /// if any.
    pub fn apply(&self, base: &mut RuleBase) -> Option<TaskStatus> {
        if let Some(name) = &self.name {
            base.name = name.clone();
        }
        if let Some(description) = &self.description {
            base.description = description.clone().unwrap_or_default();
        }
        if let Some(every) = &self.every {
            base.every = Some(every.clone());
        }
        if let Some(offset) = &self.offset {
            base.offset = offset.clone();
        }
        if let Some(sleep_until) = self.sleep_until {
            base.sleep_until = sleep_until;
        }
        if let Some(runbook_link) = &self.runbook_link {
            base.runbook_link = runbook_link.clone().unwrap_or_default();
        }
        if let Some(tag_rules) = &self.tag_rules {
            base.tag_rules = tag_rules.clone();
        }
        if let Some(status_rules) = &self.status_rules {
            base.status_rules = status_rules.clone();
        }
        if let Some(endpoint_id) = self.endpoint_id {
            base.endpoint_id = endpoint_id;
        }
        if let Some(limit) = self.limit {
            base.limit = limit;
        }
        if let Some(limit_every) = self.limit_every {
            base.limit_every = limit_every;
        }
        self.status
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn base(org_id: Id, endpoint_id: Id) -> RuleBase {
        RuleBase {
            id: None,
            name: "cpu critical".into(),
            description: String::new(),
            endpoint_id,
            org_id,
            owner_id: None,
            task_id: None,
            sleep_until: None,
            every: Some("10m".parse().expect("every")),
            offset: Some("0s".parse().expect("offset")),
            runbook_link: String::new(),
            tag_rules: vec![],
            status_rules: vec![StatusRule {
                current_level: CheckLevel::Crit,
                previous_level: None,
                count: 1,
                period: Some("1h".parse().expect("period")),
            }],
            limit_every: None,
            limit: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn pagerduty(org_id: Id, endpoint_id: Id) -> NotificationRule {
        NotificationRule::PagerDuty(PagerDutyRule {
            base: base(org_id, endpoint_id),
            message_template: "rule ${ r._notification_rule_name } fired".into(),
        })
    }

    pub fn slack(org_id: Id, endpoint_id: Id) -> NotificationRule {
        NotificationRule::Slack(SlackRule {
            base: base(org_id, endpoint_id),
            channel: "#alerts".into(),
            message_template: "${ r._message }".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_variant_from_type_discriminator() {
        let body = json!({
            "type": "pagerduty",
            "name": "just a little rule",
            "orgID": "7554d5ad97b0cd33",
            "endpointID": "04aa72fef0302000",
            "every": "10m",
            "offset": "0s",
            "status": "active",
            "labels": [],
            "tagRules": [],
            "statusRules": [{"level": "CRIT", "period": "1h", "count": 1}],
            "messageTemplate": "Notification Rule: ${ r._notification_rule_name }"
        });

        let create: NotificationRuleCreate = serde_json::from_value(body).expect("decode");
        assert_eq!(create.status, TaskStatus::Active);
        let NotificationRule::PagerDuty(rule) = &create.rule else {
            panic!("expected pagerduty rule, got {:?}", create.rule);
        };
        assert_eq!(rule.base.name, "just a little rule");
        assert_eq!(rule.base.status_rules[0].current_level, CheckLevel::Crit);
        assert_eq!(rule.base.status_rules[0].count, 1);
        assert!(rule.message_template.starts_with("Notification Rule"));
        create.rule.validate().expect("valid rule");
    }

    #[test]
    fn unknown_or_missing_type_is_rejected() {
        let unknown = json!({"type": "carrier-pigeon", "name": "x", "orgID": "0000000000000001", "endpointID": "0000000000000002"});
        assert!(serde_json::from_value::<NotificationRuleCreate>(unknown).is_err());
        let missing = json!({"name": "x", "orgID": "0000000000000001", "endpointID": "0000000000000002"});
        assert!(serde_json::from_value::<NotificationRuleCreate>(missing).is_err());
    }

    #[test]
    fn serializes_flat_with_type_and_without_private_task() {
        let org = Id::new(1).unwrap();
        let endpoint = Id::new(2).unwrap();
        let mut rule = fixtures::slack(org, endpoint);
        rule.set_id(Id::new(3).unwrap());
        rule.base_mut().task_id = Some(Id::new(4).unwrap());
        rule.clear_private_data();

        let value = serde_json::to_value(&rule).expect("serialize");
        assert_eq!(value["type"], "slack");
        assert_eq!(value["id"], "0000000000000003");
        assert_eq!(value["channel"], "#alerts");
        assert_eq!(value["statusRules"][0]["currentLevel"], "CRIT");
        assert!(value.get("taskID").is_none());
        assert!(value.get("base").is_none());
    }

    #[test]
    fn validation_rejects_bad_rules() {
        let org = Id::new(1).unwrap();
        let endpoint = Id::new(2).unwrap();

        let mut unnamed = fixtures::pagerduty(org, endpoint);
        unnamed.base_mut().name = "  ".into();
        assert!(unnamed.validate().is_err());

        let mut unscheduled = fixtures::pagerduty(org, endpoint);
        unscheduled.base_mut().every = None;
        assert!(unscheduled.validate().is_err());

        let mut half_limit = fixtures::pagerduty(org, endpoint);
        half_limit.base_mut().limit = Some(3);
        assert!(half_limit.validate().is_err());

        let mut bad_regex = fixtures::pagerduty(org, endpoint);
        bad_regex.base_mut().tag_rules.push(TagRule {
            key: "host".into(),
            value: "(".into(),
            operator: TagOperator::EqualRegex,
        });
        assert!(bad_regex.validate().is_err());

        let mut limited = fixtures::pagerduty(org, endpoint);
        limited.base_mut().limit = Some(3);
        limited.base_mut().limit_every = Some(60);
        limited.validate().expect("limit pair is valid");
    }

    #[test]
    fn patch_distinguishes_absent_null_and_value() {
        let update: NotificationRuleUpdate = serde_json::from_value(json!({
            "description": null,
            "runbookLink": "https://runbooks/cpu",
            "unknownField": true
        }))
        .expect("decode patch");
        assert_eq!(update.description, Some(None));
        assert_eq!(update.runbook_link, Some(Some("https://runbooks/cpu".into())));
        assert_eq!(update.name, None);
        assert!(!update.is_empty());

        let mut base = fixtures::base(Id::new(1).unwrap(), Id::new(2).unwrap());
        base.description = "old".into();
        assert_eq!(update.apply(&mut base), None);
        assert_eq!(base.description, "");
        assert_eq!(base.runbook_link, "https://runbooks/cpu");
        assert_eq!(base.name, "cpu critical");
    }

    #[test]
    fn patch_with_only_unknown_fields_is_empty() {
        let update: NotificationRuleUpdate =
            serde_json::from_value(json!({"whatever": 1})).expect("decode");
        assert!(update.is_empty());
        update.validate().expect("empty patch is valid");
    }

    #[test]
    fn patch_validation_checks_names_and_limit_pairs() {
        let blank: NotificationRuleUpdate =
            serde_json::from_value(json!({"name": ""})).expect("decode");
        assert!(blank.validate().is_err());

        let half: NotificationRuleUpdate =
            serde_json::from_value(json!({"limit": 5})).expect("decode");
        assert!(half.validate().is_err());

        let cleared: NotificationRuleUpdate =
            serde_json::from_value(json!({"limit": null, "limitEvery": null})).expect("decode");
        cleared.validate().expect("clearing both is valid");
    }
}
