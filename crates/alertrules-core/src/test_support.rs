use std::collections::BTreeMap;

use tempfile::TempDir;

use crate::db::Database;
use crate::endpoints::{EndpointConfig, EndpointRepository, NewEndpoint, NotificationEndpoint, SecretRef};
use crate::id::Id;
use crate::migrations::run_migrations;
use crate::orgs::{Organization, OrganizationRepository, User, UserRepository};

pub(crate) struct TestEnv {
    pub db: Database,
    pub org: Organization,
    pub user: User,
    pub slack: NotificationEndpoint,
    pub pagerduty: NotificationEndpoint,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");

        let org = OrganizationRepository::new(db.clone())
            .create("acme")
            .await
            .expect("org");
        let user = UserRepository::new(db.clone())
            .create("ada")
            .await
            .expect("user");
        let slack = create_endpoint(&db, org.id, slack_config()).await;
        let pagerduty = create_endpoint(&db, org.id, pagerduty_config()).await;

        Self {
            db,
            org,
            user,
            slack,
            pagerduty,
            _dir: dir,
        }
    }
}

pub(crate) async fn create_endpoint(
    db: &Database,
    org_id: Id,
    config: EndpointConfig,
) -> NotificationEndpoint {
    EndpointRepository::new(db.clone())
        .create(NewEndpoint {
            org_id,
            name: format!("{} endpoint", config.kind().as_str()),
            config,
        })
        .await
        .expect("endpoint")
}

pub(crate) fn slack_config() -> EndpointConfig {
    EndpointConfig::Slack {
        url: "https://hooks.slack.example.com/T000".into(),
        token: Some(SecretRef { key: "token".into() }),
    }
}

pub(crate) fn pagerduty_config() -> EndpointConfig {
    EndpointConfig::PagerDuty {
        client_url: "https://pd.example.com".into(),
        routing_key: SecretRef {
            key: "routing-key".into(),
        },
    }
}

pub(crate) fn http_config() -> EndpointConfig {
    EndpointConfig::Http {
        url: "https://hooks.example.com/alerts".into(),
        method: Default::default(),
        auth_method: Default::default(),
        username: None,
        password: None,
        token: None,
        headers: BTreeMap::new(),
    }
}
