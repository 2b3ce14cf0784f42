//! List query decoding and paging links for the rule collection.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::ServiceError;
use crate::id::Id;
use crate::mappings::{ResourceType, UserResourceMappingFilter, UserType};
use crate::rules::{NotificationRule, TagOperator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgSelector {
    Id(Id),
    Name(String),
}

/// `key:value` pair matched against a rule's equality tag rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl FromStr for Tag {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok(Tag {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err(ServiceError::invalid(format!("tag {s:?} is not a key:value pair"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFilter {
    pub org: Option<OrgSelector>,
    pub user_mapping: UserResourceMappingFilter,
    pub tags: Vec<Tag>,
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self {
            org: None,
            user_mapping: UserResourceMappingFilter::for_type(ResourceType::NotificationRules),
            tags: Vec::new(),
        }
    }
}

impl RuleFilter {
    /// True when every filter tag appears as an equality tag rule on `rule`.
    pub fn matches_tags(&self, rule: &NotificationRule) -> bool {
        self.tags.iter().all(|tag| {
            rule.base().tag_rules.iter().any(|tr| {
                tr.operator == TagOperator::Equal && tr.key == tag.key && tr.value == tag.value
            })
        })
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        match &self.org {
            Some(OrgSelector::Id(id)) => pairs.push(("orgID".to_string(), id.to_string())),
            Some(OrgSelector::Name(name)) => pairs.push(("org".to_string(), name.clone())),
            None => {}
        }
        if let Some(user_id) = self.user_mapping.user_id {
            pairs.push(("userID".to_string(), user_id.to_string()));
        }
        if let Some(resource_id) = self.user_mapping.resource_id {
            pairs.push(("resourceID".to_string(), resource_id.to_string()));
        }
        if let Some(user_type) = self.user_mapping.user_type {
            pairs.push(("userType".to_string(), user_type.as_str().to_string()));
        }
        for tag in &self.tags {
            pairs.push(("tag".to_string(), format!("{}:{}", tag.key, tag.value)));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOptions {
    pub limit: usize,
    pub offset: usize,
    pub after: Option<Id>,
    pub sort_by: Option<String>,
    pub descending: bool,
}

impl FindOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            offset: 0,
            after: None,
            sort_by: None,
            descending: false,
        }
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("descending".to_string(), self.descending.to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
        ];
        if let Some(after) = self.after {
            pairs.push(("after".to_string(), after.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            pairs.push(("sortBy".to_string(), sort_by.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(rename = "self")]
    pub self_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

fn first<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Decodes list query parameters.
///
/// Malformed `tag` values are dropped and a malformed user mapping sub-filter
/// falls back to the unrestricted one. A bad `orgID` or paging value fails
/// the whole decode.
pub fn decode_rule_filter(
    params: &[(String, String)],
    api: &ApiConfig,
) -> Result<(RuleFilter, FindOptions), ServiceError> {
    let user_mapping = decode_mapping_filter(params)
        .unwrap_or_else(|_| UserResourceMappingFilter::for_type(ResourceType::NotificationRules));
    let opts = decode_find_options(params, api)?;

    let org = if let Some(raw) = first(params, "orgID") {
        let id = raw
            .parse()
            .map_err(|err| ServiceError::invalid(format!("orgID is invalid: {err}")))?;
        Some(OrgSelector::Id(id))
    } else {
        first(params, "org").map(|name| OrgSelector::Name(name.to_string()))
    };

    let tags = params
        .iter()
        .filter(|(k, _)| k == "tag")
        .filter_map(|(_, v)| v.parse().ok())
        .collect();

    Ok((
        RuleFilter {
            org,
            user_mapping,
            tags,
        },
        opts,
    ))
}

fn decode_mapping_filter(
    params: &[(String, String)],
) -> Result<UserResourceMappingFilter, ServiceError> {
    let mut filter = UserResourceMappingFilter::for_type(ResourceType::NotificationRules);
    if let Some(raw) = first(params, "resourceID") {
        filter.resource_id = Some(raw.parse()?);
    }
    if let Some(raw) = first(params, "userID") {
        filter.user_id = Some(raw.parse()?);
    }
    if let Some(raw) = first(params, "userType") {
        filter.user_type = Some(
            UserType::from_str(raw)
                .ok_or_else(|| ServiceError::invalid(format!("unknown userType {raw:?}")))?,
        );
    }
    Ok(filter)
}

pub fn decode_find_options(
    params: &[(String, String)],
    api: &ApiConfig,
) -> Result<FindOptions, ServiceError> {
    let mut opts = FindOptions::with_limit(api.default_page_size);

    if let Some(raw) = first(params, "limit") {
        let limit: usize = raw
            .parse()
            .map_err(|_| ServiceError::invalid(format!("limit {raw:?} is not a number")))?;
        if limit < 1 || limit > api.max_page_size {
            return Err(ServiceError::invalid(format!(
                "limit must be between 1 and {}",
                api.max_page_size
            )));
        }
        opts.limit = limit;
    }
    if let Some(raw) = first(params, "offset") {
        opts.offset = raw
            .parse()
            .map_err(|_| ServiceError::invalid(format!("offset {raw:?} is not a non-negative number")))?;
    }
    if let Some(raw) = first(params, "after") {
        opts.after = Some(raw.parse()?);
    }
    if let Some(raw) = first(params, "sortBy") {
        opts.sort_by = Some(raw.to_string());
    }
    if let Some(raw) = first(params, "descending") {
        opts.descending = raw
            .parse()
            .map_err(|_| ServiceError::invalid(format!("descending {raw:?} is not a boolean")))?;
    }
    Ok(opts)
}

/// Builds `{prev, self, next}` for a page that returned `returned` items.
pub fn paging_links(
    base_path: &str,
    filter: &RuleFilter,
    opts: &FindOptions,
    returned: usize,
) -> PagingLinks {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in filter.query_pairs().into_iter().chain(opts.query_pairs()) {
        if !value.is_empty() {
            values.entry(key).or_default().push(value);
        }
    }

    let render = |values: &BTreeMap<String, Vec<String>>| {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, entries) in values {
            for value in entries {
                serializer.append_pair(key, value);
            }
        }
        format!("{base_path}?{}", serializer.finish())
    };

    let self_link = render(&values);
    let mut with_offset = |offset: usize| {
        values.insert("offset".to_string(), vec![offset.to_string()]);
        render(&values)
    };

    let next = (returned >= opts.limit).then(|| with_offset(opts.offset.saturating_add(opts.limit)));
    let prev = (opts.offset > 0).then(|| with_offset(opts.offset.saturating_sub(opts.limit)));

    PagingLinks {
        prev,
        self_link,
        next,
    }
}
