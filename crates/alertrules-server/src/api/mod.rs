//! HTTP API for notification rules.
//!
//! Everything is mounted under `/api/v2`:
//! - `/notificationRules` and `/notificationRules/{id}` for the rules themselves
//! - `/notificationRules/{id}/query` for the rendered task script
//! - `/notificationRules/{id}/members`, `/owners` and `/labels` sub-resources

pub mod auth;
pub mod error;
pub mod labels;
pub mod members;
pub mod notification_rules;

use axum::{Router, middleware};

use crate::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .nest(
            "/notificationRules",
            notification_rules::router()
                .merge(members::router())
                .merge(labels::router()),
        )
        .layer(middleware::from_fn_with_state(state, auth::resolve_principal))
}
