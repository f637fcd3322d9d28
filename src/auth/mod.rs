//! Bearer-token authentication.
//!
//! - [`claims`]: Typed token claims handed to route handlers
//! - [`jwks`]: Verifier backed by a remote JSON Web Key Set
//! - [`extract`]: axum extractor that rejects before any streaming starts

pub mod claims;
pub mod extract;
pub mod jwks;

use async_trait::async_trait;
use thiserror::Error;

pub use claims::Claims;
pub use extract::AuthenticatedUser;
pub use jwks::JwksVerifier;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("bearer token required")]
    MissingToken,

    #[error("malformed Authorization header")]
    MalformedHeader,

    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

/// Verifies a raw bearer token and yields its claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}
