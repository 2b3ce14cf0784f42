use std::collections::BTreeMap;
use std::sync::Arc;

use alertrules_core::config::ApiConfig;
use alertrules_core::endpoints::{EndpointConfig, EndpointRepository, NewEndpoint};
use alertrules_core::labels::{LabelRepository, NewLabel};
use alertrules_core::orgs::{OrganizationRepository, UserRepository};
use alertrules_core::{
    AuthorizationRepository, Collaborators, Database, Id, Principal, RuleOrchestrator, migrations,
};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::response::Response;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::AppState;

/// A migrated database with one org, one user, a slack endpoint and a token.
pub struct TestApp {
    pub state: AppState,
    pub org_id: String,
    pub user_id: String,
    pub endpoint_id: String,
    pub token: String,
    principal: Principal,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        migrations::run_migrations(&db).await.expect("migrations");

        let org = OrganizationRepository::new(db.clone())
            .create("acme")
            .await
            .expect("org");
        let user = UserRepository::new(db.clone())
            .create("ada")
            .await
            .expect("user");
        let endpoint = EndpointRepository::new(db.clone())
            .create(NewEndpoint {
                org_id: org.id,
                name: "ops slack".into(),
                config: EndpointConfig::Slack {
                    url: "https://hooks.slack.example.com/T000".into(),
                    token: None,
                },
            })
            .await
            .expect("endpoint");
        let issued = AuthorizationRepository::new(db.clone())
            .issue(org.id, user.id)
            .await
            .expect("token");

        let state = AppState {
            rules: RuleOrchestrator::new(Collaborators::sql(&db), ApiConfig::default()),
            auth: Arc::new(AuthorizationRepository::new(db.clone())),
            db,
        };

        Self {
            state,
            org_id: org.id.to_string(),
            user_id: user.id.to_string(),
            endpoint_id: endpoint.id.to_string(),
            token: issued.token,
            principal: issued.principal,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        crate::router(self.state.clone())
    }

    pub async fn create_label(&self, name: &str) -> String {
        let org_id: Id = self.org_id.parse().expect("org id");
        LabelRepository::new(self.state.db.clone())
            .create(NewLabel {
                org_id,
                name: name.to_string(),
                properties: BTreeMap::new(),
            })
            .await
            .expect("label")
            .id
            .to_string()
    }

    pub async fn create_user(&self, name: &str) -> String {
        UserRepository::new(self.state.db.clone())
            .create(name)
            .await
            .expect("user")
            .id
            .to_string()
    }

    /// Creates a slack rule owned by the test user and returns its id.
    pub async fn create_rule(&self) -> String {
        let body = json!({
            "type": "slack",
            "name": "disk full",
            "orgID": self.org_id,
            "endpointID": self.endpoint_id,
            "every": "5m",
            "channel": "#ops",
            "messageTemplate": "disk is full",
            "statusRules": [{ "level": "WARN", "count": 1 }],
        });
        let document = self
            .state
            .rules
            .create(Some(&self.principal), body.to_string().as_bytes())
            .await
            .expect("rule");
        serde_json::to_value(&document).expect("document")["id"]
            .as_str()
            .expect("rule id")
            .to_string()
    }
}

pub async fn read_json(resp: Response<Body>) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
