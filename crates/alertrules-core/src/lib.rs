pub mod auth;
pub mod config;
pub mod db;
pub mod duration;
pub mod endpoints;
pub mod error;
pub mod filter;
pub mod id;
pub mod labels;
pub mod mappings;
pub mod migrations;
pub mod orgs;
pub mod rules;
pub mod service;
pub mod tasks;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthorizationRepository, AuthorizationService, Principal};
pub use config::Config;
pub use db::Database;
pub use error::{ErrorKind, ServiceError};
pub use id::Id;
pub use rules::{NotificationRule, NotificationRuleStore, RemoteRuleStore, SqlRuleStore};
pub use service::{Collaborators, RuleOrchestrator};
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
