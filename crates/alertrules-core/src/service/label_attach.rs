use std::sync::Arc;

use tracing::debug;

use crate::id::Id;
use crate::labels::{Label, LabelMapping, LabelService};
use crate::mappings::ResourceType;

/// Attaches requested labels to a newly created rule, skipping any candidate
/// that fails to decode, resolve or map.
#[derive(Clone)]
pub struct LabelAttacher {
    labels: Arc<dyn LabelService>,
}

impl LabelAttacher {
    pub fn new(labels: Arc<dyn LabelService>) -> Self {
        Self { labels }
    }

    pub async fn attach_labels(&self, rule_id: Id, candidates: &[String]) -> Vec<Label> {
        let mut attached = Vec::new();
        for candidate in candidates {
            let label_id: Id = match candidate.parse() {
                Ok(id) => id,
                Err(err) => {
                    debug!(rule_id = %rule_id, label = %candidate, error = %err, "skipping malformed label id");
                    continue;
                }
            };
            let label = match self.labels.find_label_by_id(label_id).await {
                Ok(label) => label,
                Err(err) => {
                    debug!(rule_id = %rule_id, label_id = %label_id, error = %err, "skipping unresolved label");
                    continue;
                }
            };
            let mapping = LabelMapping {
                label_id,
                resource_id: rule_id,
                resource_type: ResourceType::NotificationRules,
            };
            if let Err(err) = self.labels.create_label_mapping(&mapping).await {
                debug!(rule_id = %rule_id, label_id = %label_id, error = %err, "skipping label mapping");
                continue;
            }
            attached.push(label);
        }
        attached
    }
}
