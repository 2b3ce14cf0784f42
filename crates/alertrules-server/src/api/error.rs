use alertrules_core::{ErrorKind, ServiceError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Structured error body: a machine-readable code and a human message.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status: status_for(kind),
            code: kind.as_str(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (ServiceError::invalid("bad"), StatusCode::BAD_REQUEST, "invalid"),
            (ServiceError::unauthorized("who"), StatusCode::UNAUTHORIZED, "unauthorized"),
            (ServiceError::not_found("gone"), StatusCode::NOT_FOUND, "not_found"),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT, "conflict"),
            (ServiceError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            let body = serde_json::to_value(&api).expect("serialize");
            assert_eq!(body["code"], code);
            assert!(body.get("status").is_none());
        }
    }
}
