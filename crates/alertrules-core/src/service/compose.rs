use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::warn;

use crate::error::ServiceError;
use crate::filter::{FindOptions, PagingLinks, RuleFilter, paging_links};
use crate::id::Id;
use crate::labels::{Label, LabelService};
use crate::mappings::ResourceType;
use crate::rules::{NotificationRule, TaskStatus};
use crate::tasks::TaskService;

pub const RULES_PATH: &str = "/api/v2/notificationRules";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub labels: String,
    pub members: String,
    pub owners: String,
    pub query: String,
}

impl RuleLinks {
    pub fn for_rule(id: Id) -> Self {
        let base = format!("{RULES_PATH}/{id}");
        Self {
            labels: format!("{base}/labels"),
            members: format!("{base}/members"),
            owners: format!("{base}/owners"),
            query: format!("{base}/query"),
            self_link: base,
        }
    }
}

/// Outbound rule representation: the rule's own fields, flattened, next to
/// its labels, links and the run snapshot of its backing task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRuleDocument {
    #[serde(flatten)]
    pub rule: NotificationRule,
    pub labels: Vec<Label>,
    pub links: RuleLinks,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_completed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_scheduled: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_error: Option<String>,
}

/// What happened to one rule while composing a list page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Composed,
    /// Labels could not be loaded; the document carries an empty label list.
    ComposedWithoutLabels { error: String },
    /// The task snapshot could not be loaded; the rule is left out of the page.
    Dropped { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub rule_id: Option<Id>,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone)]
pub struct ComposedPage {
    pub documents: Vec<NotificationRuleDocument>,
    pub links: PagingLinks,
    /// One report per input rule, in store order.
    pub outcomes: Vec<ItemReport>,
}

#[derive(Clone)]
pub struct ResponseComposer {
    tasks: Arc<dyn TaskService>,
    labels: Arc<dyn LabelService>,
    concurrency: usize,
}

impl ResponseComposer {
    pub fn new(
        tasks: Arc<dyn TaskService>,
        labels: Arc<dyn LabelService>,
        concurrency: usize,
    ) -> Self {
        Self {
            tasks,
            labels,
            concurrency: concurrency.max(1),
        }
    }

    /// Composes one document. Fails with `Internal` when the task snapshot
    /// cannot be loaded, including for rules that arrive without a task id
    /// (as `RemoteRuleStore` returns them).
    pub async fn compose(
        &self,
        mut rule: NotificationRule,
        labels: Vec<Label>,
    ) -> Result<NotificationRuleDocument, ServiceError> {
        let id = rule.id()?;
        let task_id = rule.base().task_id.ok_or_else(|| {
            ServiceError::internal(format!(
                "notification rule {id} has no task id; its store does not expose tasks"
            ))
        })?;
        let task = self.tasks.find_task_by_id(task_id).await.map_err(|err| {
            ServiceError::internal(format!(
                "failed to load task {task_id} of notification rule {id}: {err}"
            ))
        })?;

        rule.clear_private_data();
        Ok(NotificationRuleDocument {
            rule,
            labels,
            links: RuleLinks::for_rule(id),
            status: task.status,
            latest_completed: task.latest_completed,
            latest_scheduled: task.latest_scheduled,
            last_run_status: task.last_run_status,
            last_run_error: task.last_run_error,
        })
    }

    /// Composes a page in store order. Per-item failures degrade the page
    /// instead of failing it.
    pub async fn compose_all(
        &self,
        rules: Vec<NotificationRule>,
        filter: &RuleFilter,
        opts: &FindOptions,
    ) -> ComposedPage {
        let links = paging_links(RULES_PATH, filter, opts, rules.len());

        let results: Vec<_> = stream::iter(rules)
            .map(|rule| self.compose_item(rule))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut documents = Vec::with_capacity(results.len());
        let mut outcomes = Vec::with_capacity(results.len());
        for (report, document) in results {
            if let Some(document) = document {
                documents.push(document);
            }
            outcomes.push(report);
        }

        ComposedPage {
            documents,
            links,
            outcomes,
        }
    }

    async fn compose_item(
        &self,
        rule: NotificationRule,
    ) -> (ItemReport, Option<NotificationRuleDocument>) {
        let rule_id = rule.base().id;
        let (labels, label_error) = match rule_id {
            Some(id) => match self
                .labels
                .find_resource_labels(ResourceType::NotificationRules, id)
                .await
            {
                Ok(labels) => (labels, None),
                Err(err) => (Vec::new(), Some(err.to_string())),
            },
            None => (Vec::new(), None),
        };

        match self.compose(rule, labels).await {
            Ok(document) => {
                let outcome = match label_error {
                    Some(error) => ItemOutcome::ComposedWithoutLabels { error },
                    None => ItemOutcome::Composed,
                };
                (ItemReport { rule_id, outcome }, Some(document))
            }
            Err(err) => {
                warn!(rule_id = ?rule_id, error = %err, "dropping notification rule from list");
                (
                    ItemReport {
                        rule_id,
                        outcome: ItemOutcome::Dropped {
                            error: err.to_string(),
                        },
                    },
                    None,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelMapping, LabelRepository, NewLabel};
    use crate::rules::types::fixtures;
    use crate::rules::{NotificationRuleCreate, NotificationRuleStore, SqlRuleStore};
    use crate::tasks::{Task, TaskRepository, TaskRun};
    use crate::test_support::TestEnv;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    struct FlakyLabels {
        inner: LabelRepository,
        failing: HashSet<Id>,
    }

    #[async_trait]
    impl LabelService for FlakyLabels {
        async fn find_label_by_id(&self, id: Id) -> Result<Label, ServiceError> {
            self.inner.find_label_by_id(id).await
        }

        async fn find_resource_labels(
            &self,
            resource_type: ResourceType,
            resource_id: Id,
        ) -> Result<Vec<Label>, ServiceError> {
            if self.failing.contains(&resource_id) {
                return Err(ServiceError::internal("label backend unavailable"));
            }
            self.inner.find_resource_labels(resource_type, resource_id).await
        }

        async fn create_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError> {
            self.inner.create_label_mapping(mapping).await
        }

        async fn delete_label_mapping(&self, mapping: &LabelMapping) -> Result<(), ServiceError> {
            self.inner.delete_label_mapping(mapping).await
        }
    }

    struct MissingTasks {
        inner: TaskRepository,
        missing: HashSet<Id>,
    }

    #[async_trait]
    impl TaskService for MissingTasks {
        async fn find_task_by_id(&self, id: Id) -> Result<Task, ServiceError> {
            if self.missing.contains(&id) {
                return Err(ServiceError::not_found(format!("task {id} not found")));
            }
            self.inner.find_task_by_id(id).await
        }
    }

    async fn create_rules(env: &TestEnv, names: &[&str]) -> Vec<NotificationRule> {
        let store = SqlRuleStore::new(env.db.clone());
        let mut rules = Vec::new();
        for name in names {
            let mut rule = fixtures::slack(env.org.id, env.slack.id);
            rule.base_mut().name = name.to_string();
            rules.push(
                store
                    .create_rule(
                        NotificationRuleCreate {
                            rule,
                            status: TaskStatus::Active,
                        },
                        env.user.id,
                    )
                    .await
                    .expect("create rule"),
            );
        }
        rules
    }

    #[tokio::test]
    async fn compose_flattens_rule_and_hides_task_id() {
        let env = TestEnv::new().await;
        let rule = create_rules(&env, &["cpu"]).await.remove(0);
        let id = rule.id().unwrap();
        let tasks = TaskRepository::new(env.db.clone());
        let completed = Utc::now();
        tasks
            .record_run(
                rule.task_id().unwrap(),
                TaskRun {
                    scheduled_for: completed,
                    completed_at: completed,
                    status: "success".into(),
                    error: None,
                },
            )
            .await
            .expect("record run");

        let composer = ResponseComposer::new(
            Arc::new(tasks),
            Arc::new(LabelRepository::new(env.db.clone())),
            4,
        );
        let document = composer.compose(rule, Vec::new()).await.expect("compose");
        let value = serde_json::to_value(&document).expect("serialize");

        assert_eq!(value["type"], json!("slack"));
        assert_eq!(value["id"], json!(id.to_string()));
        assert_eq!(value["name"], json!("cpu"));
        assert_eq!(value["status"], json!("active"));
        assert_eq!(value["lastRunStatus"], json!("success"));
        assert!(value.get("taskID").is_none());
        assert!(value.get("lastRunError").is_none());
        assert_eq!(
            value["links"]["query"],
            json!(format!("/api/v2/notificationRules/{id}/query"))
        );
    }

    #[tokio::test]
    async fn compose_fails_internally_without_task() {
        let env = TestEnv::new().await;
        let rule = create_rules(&env, &["cpu"]).await.remove(0);
        let composer = ResponseComposer::new(
            Arc::new(MissingTasks {
                inner: TaskRepository::new(env.db.clone()),
                missing: HashSet::from([rule.task_id().unwrap()]),
            }),
            Arc::new(LabelRepository::new(env.db.clone())),
            4,
        );
        let err = composer.compose(rule, Vec::new()).await.expect_err("no task");
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn compose_rejects_rules_without_task_id() {
        let env = TestEnv::new().await;
        let mut rule = create_rules(&env, &["cpu"]).await.remove(0);
        rule.clear_private_data();
        let composer = ResponseComposer::new(
            Arc::new(TaskRepository::new(env.db.clone())),
            Arc::new(LabelRepository::new(env.db.clone())),
            4,
        );

        let err = composer
            .compose(rule, Vec::new())
            .await
            .expect_err("no task id");
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert!(err.to_string().contains("has no task id"), "{err}");
    }

    #[tokio::test]
    async fn compose_all_keeps_order_and_reports_degraded_items() {
        let env = TestEnv::new().await;
        let rules = create_rules(&env, &["a", "b", "c", "d"]).await;
        let ids: Vec<Id> = rules.iter().map(|r| r.id().unwrap()).collect();

        let labels = LabelRepository::new(env.db.clone());
        let label = labels
            .create(NewLabel {
                org_id: env.org.id,
                name: "prod".into(),
                properties: BTreeMap::new(),
            })
            .await
            .expect("label");
        labels
            .create_label_mapping(&LabelMapping {
                label_id: label.id,
                resource_id: ids[0],
                resource_type: ResourceType::NotificationRules,
            })
            .await
            .expect("map");

        let composer = ResponseComposer::new(
            Arc::new(MissingTasks {
                inner: TaskRepository::new(env.db.clone()),
                missing: HashSet::from([rules[2].task_id().unwrap()]),
            }),
            Arc::new(FlakyLabels {
                inner: labels,
                failing: HashSet::from([ids[1]]),
            }),
            2,
        );

        let opts = FindOptions::with_limit(4);
        let page = composer
            .compose_all(rules, &RuleFilter::default(), &opts)
            .await;

        let names: Vec<_> = page
            .documents
            .iter()
            .map(|d| d.rule.base().name.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "d"]);
        assert_eq!(page.documents[0].labels, vec![label]);
        assert!(page.documents[1].labels.is_empty());

        assert_eq!(page.outcomes.len(), 4);
        assert_eq!(page.outcomes[0].outcome, ItemOutcome::Composed);
        assert!(matches!(
            page.outcomes[1].outcome,
            ItemOutcome::ComposedWithoutLabels { .. }
        ));
        assert!(matches!(page.outcomes[2].outcome, ItemOutcome::Dropped { .. }));
        assert_eq!(page.outcomes[2].rule_id, Some(ids[2]));
        assert_eq!(page.outcomes[3].outcome, ItemOutcome::Composed);

        // links follow the store page, not the surviving documents
        assert!(page.links.next.is_some());
    }
}
