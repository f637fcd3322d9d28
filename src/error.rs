//! HTTP-facing error type.
//!
//! Everything that can fail *before* a stream is opened ends up here and is
//! answered with a status code and a small JSON body. Failures after the
//! first event are the relay's business and travel in-band.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Auth(AuthError::MissingToken | AuthError::MalformedHeader) => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::Auth(AuthError::Rejected(_) | AuthError::KeysUnavailable(_)) => {
                StatusCode::FORBIDDEN
            }
            ServerError::Upstream(UpstreamError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Key-fetch and upstream details stay in the logs.
        let message = match &self {
            ServerError::Auth(AuthError::KeysUnavailable(_)) => "unable to verify token".to_string(),
            ServerError::Upstream(e) => e.public_message().to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
