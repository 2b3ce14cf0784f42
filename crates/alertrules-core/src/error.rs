use thiserror::Error;

use crate::db::DbError;

/// Machine-readable error classification shared by every collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Invalid,
    NotFound,
    Unauthorized,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal_error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "invalid" => Some(Self::Invalid),
            "not_found" => Some(Self::NotFound),
            "unauthorized" => Some(Self::Unauthorized),
            "conflict" => Some(Self::Conflict),
            "internal_error" => Some(Self::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Rebuilds an error reported by a peer server from its wire kind.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Invalid => Self::Invalid(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Unauthorized => Self::Unauthorized(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Internal => Self::Internal(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Invalid(_) => ErrorKind::Invalid,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Internal(_)
            | ServiceError::Database(_)
            | ServiceError::Sql(_)
            | ServiceError::Json(_)
            | ServiceError::DateTimeParse(_)
            | ServiceError::Http(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_classify_as_internal() {
        let err = ServiceError::from(serde_json::from_str::<u8>("nope").unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().starts_with("json error"));
    }

    #[test]
    fn wire_kinds_round_trip() {
        for kind in [
            ErrorKind::Invalid,
            ErrorKind::NotFound,
            ErrorKind::Unauthorized,
            ErrorKind::Conflict,
            ErrorKind::Internal,
        ] {
            assert_eq!(ErrorKind::from_str(kind.as_str()), Some(kind));
            assert_eq!(ServiceError::from_kind(kind, "x").kind(), kind);
        }
        assert_eq!(ErrorKind::from_str("teapot"), None);
    }
}
