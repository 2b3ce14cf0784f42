//! Member and owner sub-resources of a notification rule.

use alertrules_core::mappings::UserType;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};

use super::auth::CurrentPrincipal;
use super::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/members", get(list_members).post(add_member))
        .route("/{id}/members/{user_id}", delete(remove_member))
        .route("/{id}/owners", get(list_owners).post(add_owner))
        .route("/{id}/owners/{user_id}", delete(remove_owner))
}

async fn list(state: AppState, id: &str, user_type: UserType) -> Result<Response, ApiError> {
    let members = state.rules.list_members(id, user_type).await?;
    Ok((StatusCode::OK, Json(members)).into_response())
}

async fn add(
    state: AppState,
    principal: CurrentPrincipal,
    id: &str,
    user_type: UserType,
    body: &[u8],
) -> Result<Response, ApiError> {
    let member = state
        .rules
        .add_member(principal.0.as_ref(), id, user_type, body)
        .await?;
    Ok((StatusCode::CREATED, Json(member)).into_response())
}

async fn remove(
    state: AppState,
    id: &str,
    user_id: &str,
    user_type: UserType,
) -> Result<Response, ApiError> {
    state.rules.remove_member(id, user_id, user_type).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    list(state, &id, UserType::Member).await
}

async fn add_member(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    add(state, principal, &id, UserType::Member, &body).await
}

async fn remove_member(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    remove(state, &id, &user_id, UserType::Member).await
}

async fn list_owners(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    list(state, &id, UserType::Owner).await
}

async fn add_owner(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    add(state, principal, &id, UserType::Owner, &body).await
}

async fn remove_owner(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    remove(state, &id, &user_id, UserType::Owner).await
}
