mod compose;
mod label_attach;
mod orchestrator;
mod resources;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::db::Database;
use crate::endpoints::{EndpointRepository, EndpointService};
use crate::error::ServiceError;
use crate::id::Id;
use crate::labels::{LabelRepository, LabelService};
use crate::mappings::{MappingRepository, UserResourceMappingService};
use crate::orgs::{OrganizationRepository, OrganizationService, UserRepository, UserService};
use crate::rules::{NotificationRuleStore, SqlRuleStore};
use crate::tasks::{TaskRepository, TaskService};

pub use compose::{
    ComposedPage, ItemOutcome, ItemReport, NotificationRuleDocument, RULES_PATH, ResponseComposer,
    RuleLinks,
};
pub use label_attach::LabelAttacher;
pub use orchestrator::RuleOrchestrator;
pub use resources::{LabelList, LabelResponse, MemberList, ResourceMember, SelfLink};

/// Everything the orchestrator talks to, resolved up front.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn NotificationRuleStore>,
    pub tasks: Arc<dyn TaskService>,
    pub labels: Arc<dyn LabelService>,
    pub endpoints: Arc<dyn EndpointService>,
    pub orgs: Arc<dyn OrganizationService>,
    pub users: Arc<dyn UserService>,
    pub mappings: Arc<dyn UserResourceMappingService>,
}

impl Collaborators {
    /// Wires the libsql implementations against one database.
    pub fn sql(db: &Database) -> Self {
        Self {
            store: Arc::new(SqlRuleStore::new(db.clone())),
            tasks: Arc::new(TaskRepository::new(db.clone())),
            labels: Arc::new(LabelRepository::new(db.clone())),
            endpoints: Arc::new(EndpointRepository::new(db.clone())),
            orgs: Arc::new(OrganizationRepository::new(db.clone())),
            users: Arc::new(UserRepository::new(db.clone())),
            mappings: Arc::new(MappingRepository::new(db.clone())),
        }
    }
}

pub(crate) fn decode_id(raw: &str, name: &str) -> Result<Id, ServiceError> {
    if raw.is_empty() {
        return Err(ServiceError::invalid(format!("url missing {name}")));
    }
    raw.parse()
        .map_err(|err| ServiceError::invalid(format!("{name} is invalid: {err}")))
}

pub(crate) fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|err| ServiceError::invalid(format!("invalid request body: {err}")))
}
