//! Label sub-resource of a notification rule.

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
        .route("/{id}/labels", get(list_labels).post(add_label))
        .route("/{id}/labels/{label_id}", delete(remove_label))
}

async fn list_labels(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let labels = state.rules.list_labels(&id).await?;
    Ok((StatusCode::OK, Json(labels)).into_response())
}

async fn add_label(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let label = state.rules.add_label(principal.as_ref(), &id, &body).await?;
    Ok((StatusCode::CREATED, Json(label)).into_response())
}

async fn remove_label(
    State(state): State<AppState>,
    Path((id, label_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.rules.remove_label(&id, &label_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
