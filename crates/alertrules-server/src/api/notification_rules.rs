//! Notification rule endpoints.
//!
//! - GET /api/v2/notificationRules - List rules
//! - POST /api/v2/notificationRules - Create a rule
//! - GET /api/v2/notificationRules/{id} - Get a rule
//! - PUT /api/v2/notificationRules/{id} - Replace a rule
//! - PATCH /api/v2/notificationRules/{id} - Patch a rule
//! - DELETE /api/v2/notificationRules/{id} - Delete a rule
//! - GET /api/v2/notificationRules/{id}/query - Render the rule's task script

use alertrules_core::filter::PagingLinks;
use alertrules_core::service::NotificationRuleDocument;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use super::auth::CurrentPrincipal;
use super::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route(
            "/{id}",
            get(get_rule)
                .put(replace_rule)
                .patch(patch_rule)
                .delete(delete_rule),
        )
        .route("/{id}/query", get(get_query))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleListResponse {
    notification_rules: Vec<NotificationRuleDocument>,
    links: PagingLinks,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    flux: String,
}

/// GET /api/v2/notificationRules
///
/// Items whose task snapshot cannot be loaded are left out rather than
/// failing the page.
async fn list_rules(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let page = state.rules.list(&params).await?;
    Ok((
        StatusCode::OK,
        Json(RuleListResponse {
            notification_rules: page.documents,
            links: page.links,
        }),
    )
        .into_response())
}

async fn create_rule(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    body: Bytes,
) -> Result<Response, ApiError> {
    let document = state.rules.create(principal.as_ref(), &body).await?;
    Ok((StatusCode::CREATED, Json(document)).into_response())
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let document = state.rules.get(&id).await?;
    Ok((StatusCode::OK, Json(document)).into_response())
}

async fn replace_rule(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let document = state.rules.replace(principal.as_ref(), &id, &body).await?;
    Ok((StatusCode::OK, Json(document)).into_response())
}

async fn patch_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let document = state.rules.patch(&id, &body).await?;
    Ok((StatusCode::OK, Json(document)).into_response())
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.rules.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let flux = state.rules.query(&id).await?;
    Ok((StatusCode::OK, Json(QueryResponse { flux })).into_response())
}
