mod query;
mod remote;
mod repository;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::filter::{FindOptions, RuleFilter};
use crate::id::Id;

pub use remote::RemoteRuleStore;
pub use repository::SqlRuleStore;
pub use types::{
    CheckLevel, HttpRule, NotificationRule, NotificationRuleCreate, NotificationRuleUpdate,
    PagerDutyRule, RuleBase, SlackRule, StatusRule, TagOperator, TagRule, TaskStatus,
};

/// Persistence contract for notification rules.
#[async_trait]
pub trait NotificationRuleStore: Send + Sync {
    async fn find_rule_by_id(&self, id: Id) -> Result<NotificationRule, ServiceError>;

    /// Returns one page of matching rules and the total number of matches.
    async fn find_rules(
        &self,
        filter: &RuleFilter,
        opts: &FindOptions,
    ) -> Result<(Vec<NotificationRule>, usize), ServiceError>;

    async fn create_rule(
        &self,
        create: NotificationRuleCreate,
        user_id: Id,
    ) -> Result<NotificationRule, ServiceError>;

    async fn update_rule(
        &self,
        id: Id,
        update: NotificationRuleCreate,
        user_id: Id,
    ) -> Result<NotificationRule, ServiceError>;

    async fn patch_rule(
        &self,
        id: Id,
        patch: NotificationRuleUpdate,
    ) -> Result<NotificationRule, ServiceError>;

    async fn delete_rule(&self, id: Id) -> Result<(), ServiceError>;
}
