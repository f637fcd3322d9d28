//! Bearer token extraction for the streaming endpoints.
//!
//! Runs before the handler body, so a rejected request never reaches the
//! upstream API or the relay.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::debug;

use super::{AuthError, Claims};
use crate::error::ServerError;
use crate::server::routes::AppState;

/// The verified caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(verifier) = state.verifier.as_ref() else {
            return Ok(AuthenticatedUser(Claims::anonymous()));
        };

        let token = bearer_token(&parts.headers)?;
        let claims = verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "Bearer token rejected");
            e
        })?;
        Ok(AuthenticatedUser(claims))
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?.trim();

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}
