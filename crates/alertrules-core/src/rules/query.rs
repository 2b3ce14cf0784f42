//! Renders the executable Flux script behind a rule.

use crate::endpoints::{EndpointConfig, HttpAuthMethod, NotificationEndpoint, SecretRef};
use crate::error::ServiceError;

use super::types::{CheckLevel, NotificationRule, StatusRule, TagOperator, TagRule};

impl NotificationRule {
    /// Renders the task script that evaluates this rule and notifies
    /// `endpoint`. Fails with `Invalid` when the endpoint belongs to another
    /// channel family.
    pub fn render_query(&self, endpoint: &NotificationEndpoint) -> Result<String, ServiceError> {
        if endpoint.kind() != self.kind() {
            return Err(ServiceError::invalid(format!(
                "endpoint type {} is incompatible with rule type {}",
                endpoint.kind().as_str(),
                self.kind().as_str()
            )));
        }

        let base = self.base();
        let id = self.id()?;
        let every = base
            .every
            .as_ref()
            .ok_or_else(|| ServiceError::invalid("notification rule every is required"))?;

        let package = endpoint.kind().as_str();
        let mut lines = vec![
            format!("import \"{package}\""),
            "import \"influxdata/influxdb/monitor\"".to_string(),
            "import \"influxdata/influxdb/secrets\"".to_string(),
            "import \"experimental\"".to_string(),
        ];
        if matches!(endpoint.config, EndpointConfig::Http { .. }) {
            lines.push("import \"json\"".to_string());
        }
        lines.push(String::new());

        let mut task = format!("option task = {{name: {}, every: {every}", quote(&base.name));
        if let Some(offset) = &base.offset {
            task.push_str(&format!(", offset: {offset}"));
        }
        task.push('}');
        lines.push(task);
        lines.push(String::new());

        lines.extend(endpoint_lines(&endpoint.config));
        lines.push(format!(
            "notification = {{_notification_rule_id: \"{id}\", _notification_rule_name: {}, _notification_endpoint_id: \"{}\", _notification_endpoint_name: {}}}",
            quote(&base.name),
            endpoint.id,
            quote(&endpoint.name),
        ));
        lines.push(format!(
            "statuses = monitor[\"from\"](start: -{every}, fn: {})",
            tag_predicate(&base.tag_rules)
        ));

        let streams: Vec<String> = if base.status_rules.is_empty() {
            vec!["statuses".to_string()]
        } else {
            base.status_rules
                .iter()
                .enumerate()
                .map(|(idx, rule)| {
                    let name = format!("{}_{idx}", rule.current_level.as_str().to_lowercase());
                    lines.push(format!("{name} = {}", status_stream(rule)));
                    name
                })
                .collect()
        };
        let source = if streams.len() == 1 {
            streams[0].clone()
        } else {
            format!("union(tables: [{}])", streams.join(", "))
        };
        lines.push(format!(
            "all_statuses = {source}\n    |> filter(fn: (r) => r[\"_time\"] >= experimental[\"subDuration\"](from: now(), d: {every}))"
        ));
        lines.push(String::new());
        lines.push(format!(
            "all_statuses\n    |> monitor[\"notify\"](data: notification, endpoint: {package}_endpoint(mapFn: {}))",
            map_fn(self, &endpoint.config)
        ));

        Ok(lines.join("\n") + "\n")
    }
}

fn endpoint_lines(config: &EndpointConfig) -> Vec<String> {
    match config {
        EndpointConfig::Slack { url, token } => {
            let token = token
                .as_ref()
                .map(|token| format!(", token: {}", secret(token)))
                .unwrap_or_default();
            vec![format!(
                "slack_endpoint = slack[\"endpoint\"](url: {}{token})",
                quote(url)
            )]
        }
        EndpointConfig::PagerDuty { routing_key, .. } => vec![
            "pagerduty_endpoint = pagerduty[\"endpoint\"]()".to_string(),
            format!("routing_key = {}", secret(routing_key)),
        ],
        EndpointConfig::Http {
            url,
            auth_method,
            username,
            password,
            token,
            headers,
            ..
        } => {
            let mut entries = vec!["\"Content-Type\": \"application/json\"".to_string()];
            match (auth_method, username, password, token) {
                (HttpAuthMethod::Basic, Some(user), Some(pass), _) => entries.push(format!(
                    "\"Authorization\": http[\"basicAuth\"](u: {}, p: {})",
                    secret(user),
                    secret(pass)
                )),
                (HttpAuthMethod::Bearer, _, _, Some(token)) => entries.push(format!(
                    "\"Authorization\": \"Bearer \" + {}",
                    secret(token)
                )),
                _ => {}
            }
            entries.extend(
                headers
                    .iter()
                    .map(|(name, value)| format!("{}: {}", quote(name), quote(value))),
            );
            vec![
                format!("headers = {{{}}}", entries.join(", ")),
                format!("http_endpoint = http[\"endpoint\"](url: {})", quote(url)),
            ]
        }
    }
}

fn map_fn(rule: &NotificationRule, config: &EndpointConfig) -> String {
    match (rule, config) {
        (NotificationRule::Slack(slack), _) => format!(
            "(r) => ({{channel: {}, text: {}, color: if r[\"_level\"] == \"crit\" then \"danger\" else if r[\"_level\"] == \"warn\" then \"warning\" else \"good\"}})",
            quote(&slack.channel),
            template_or_message(&slack.message_template),
        ),
        (NotificationRule::PagerDuty(pagerduty), EndpointConfig::PagerDuty { client_url, .. }) => {
            format!(
                "(r) => ({{routingKey: routing_key, client: \"influxdata\", clientURL: {}, class: r[\"_check_name\"], group: r[\"_source_measurement\"], severity: pagerduty[\"severityFromLevel\"](level: r[\"_level\"]), eventAction: pagerduty[\"actionFromLevel\"](level: r[\"_level\"]), source: notification[\"_notification_rule_name\"], summary: {}, timestamp: time(v: r[\"_source_timestamp\"])}})",
                quote(client_url),
                template_or_message(&pagerduty.message_template),
            )
        }
        _ => "(r) => {\n        body = r\n        return {headers: headers, data: json[\"encode\"](v: body)}\n    }"
            .to_string(),
    }
}

fn status_stream(rule: &StatusRule) -> String {
    let level = rule.current_level.as_str().to_lowercase();
    let mut stream = "statuses".to_string();

    match (rule.previous_level, rule.current_level) {
        (Some(previous), _) => stream.push_str(&format!(
            "\n    |> monitor[\"stateChanges\"](fromLevel: \"{}\", toLevel: \"{level}\")",
            previous.as_str().to_lowercase()
        )),
        (None, CheckLevel::Any) => {}
        (None, _) => stream.push_str(&format!(
            "\n    |> filter(fn: (r) => r[\"_level\"] == \"{level}\")"
        )),
    }
    if let Some(period) = &rule.period {
        stream.push_str(&format!(
            "\n    |> filter(fn: (r) => r[\"_time\"] >= experimental[\"subDuration\"](from: now(), d: {period}))"
        ));
    }
    if rule.count > 1 {
        stream.push_str(&format!(
            "\n    |> stateCount(fn: (r) => r[\"_level\"] == \"{level}\")\n    |> filter(fn: (r) => r[\"stateCount\"] >= {})",
            rule.count
        ));
    }
    stream
}

fn tag_predicate(tags: &[TagRule]) -> String {
    if tags.is_empty() {
        return "(r) => true".to_string();
    }
    let clauses: Vec<String> = tags
        .iter()
        .map(|tag| {
            let field = format!("r[{}]", quote(&tag.key));
            match tag.operator {
                TagOperator::Equal => format!("{field} == {}", quote(&tag.value)),
                TagOperator::NotEqual => format!("{field} != {}", quote(&tag.value)),
                TagOperator::EqualRegex => format!("{field} =~ {}", regex_literal(&tag.value)),
                TagOperator::NotEqualRegex => format!("{field} !~ {}", regex_literal(&tag.value)),
            }
        })
        .collect();
    format!("(r) => {}", clauses.join(" and "))
}

fn template_or_message(template: &str) -> String {
    if template.is_empty() {
        "r[\"_message\"]".to_string()
    } else {
        // Templates keep their ${ } interpolations.
        format!("\"{}\"", template.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn secret(secret: &SecretRef) -> String {
    format!("secrets[\"get\"](key: {})", quote(&secret.key))
}

fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{escaped}\"")
}

fn regex_literal(pattern: &str) -> String {
    format!("/{}/", pattern.replace('/', "\\/"))
}
