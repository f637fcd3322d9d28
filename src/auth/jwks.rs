//! JWKS-backed token verification.
//!
//! Keys are fetched from the configured endpoint at startup and cached by
//! `kid`. An unknown `kid` (key rotation) triggers a refetch, at most once per
//! refresh interval so a flood of bad tokens cannot hammer the endpoint.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{AuthError, Claims, TokenVerifier};

/// Timeout for JWKS fetches (connect + response).
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Signature algorithms accepted from the JWKS. Symmetric algorithms are
/// never valid here since the key set is public.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

#[derive(Default)]
struct KeyCache {
    keys_by_kid: HashMap<String, DecodingKey>,
    /// Stamped before each fetch, successful or not.
    last_refresh_attempt: Option<Instant>,
}

/// Verifies tokens against a remote JSON Web Key Set.
pub struct JwksVerifier {
    client: reqwest::Client,
    jwks_url: String,
    min_refresh_interval: Duration,
    cache: RwLock<KeyCache>,
}

impl JwksVerifier {
    /// Create a verifier. Does not fetch; call [`warm`](Self::warm).
    pub fn new(jwks_url: impl Into<String>, min_refresh_interval: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            jwks_url: jwks_url.into(),
            min_refresh_interval,
            cache: RwLock::new(KeyCache::default()),
        })
    }

    /// Fetch keys ahead of the first request. Failure is logged, not fatal:
    /// the next token with an unknown `kid` retries.
    pub async fn warm(&self) -> usize {
        match self.refresh().await {
            Ok(count) => {
                info!(jwks_url = %self.jwks_url, kid_count = count, "JWKS cached");
                count
            }
            Err(e) => {
                warn!(jwks_url = %self.jwks_url, error = %e, "Failed to fetch JWKS at startup");
                0
            }
        }
    }

    /// Number of cached keys.
    pub async fn cached_keys(&self) -> usize {
        self.cache.read().await.keys_by_kid.len()
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cache.read().await.keys_by_kid.get(kid) {
            return Ok(key.clone());
        }

        let recently_refreshed = self
            .cache
            .read()
            .await
            .last_refresh_attempt
            .is_some_and(|t| t.elapsed() < self.min_refresh_interval);

        if !recently_refreshed {
            debug!(kid, "Unknown kid, refreshing JWKS");
            self.refresh().await?;
        }

        self.cache
            .read()
            .await
            .keys_by_kid
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::Rejected(format!("unknown signing key: {kid}")))
    }

    async fn refresh(&self) -> Result<usize, AuthError> {
        self.cache.write().await.last_refresh_attempt = Some(Instant::now());

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeysUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                self.jwks_url
            )));
        }

        let jwk_set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        let keys_by_kid = build_key_map(&jwk_set);
        let count = keys_by_kid.len();
        self.cache.write().await.keys_by_kid = keys_by_kid;
        Ok(count)
    }
}

/// Index usable keys by `kid`. Keys without a `kid` cannot be selected and
/// are skipped.
fn build_key_map(jwk_set: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();
    for jwk in &jwk_set.keys {
        let Some(kid) = &jwk.common.key_id else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid.clone(), key);
            }
            Err(e) => debug!(kid = kid.as_str(), error = %e, "Skipping unusable JWK"),
        }
    }
    keys
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::Rejected(format!("invalid token header: {e}")))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::Rejected(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::Rejected("token has no kid".to_string()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        Ok(data.claims)
    }
}
