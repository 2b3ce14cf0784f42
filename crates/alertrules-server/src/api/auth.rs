use std::convert::Infallible;

use alertrules_core::{Principal, ServiceError};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::error::ApiError;
use crate::AppState;

/// Principal resolved by [`resolve_principal`], if the request carried a token.
pub struct CurrentPrincipal(pub Option<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentPrincipal {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Principal>().cloned()))
    }
}

fn parse_token(header: &str) -> Option<String> {
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Resolves `Authorization: Token <t>` (or `Bearer <t>`) into a principal.
/// Requests without the header pass through anonymously.
pub async fn resolve_principal(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match req.headers().get(AUTHORIZATION) {
        None => return next.run(req).await,
        Some(value) => value.to_str().ok().and_then(parse_token),
    };
    let Some(token) = token else {
        return ApiError::from(ServiceError::unauthorized("malformed authorization header"))
            .into_response();
    };

    match state.auth.find_by_token(&token).await {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_and_bearer_schemes() {
        assert_eq!(parse_token("Token abc").as_deref(), Some("abc"));
        assert_eq!(parse_token("Bearer abc").as_deref(), Some("abc"));
        assert_eq!(parse_token("Basic abc"), None);
        assert_eq!(parse_token("Token   "), None);
    }
}
