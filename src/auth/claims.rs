use serde::{Deserialize, Serialize};

/// Claims of a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,

    /// Expiry (seconds since the epoch).
    pub exp: u64,

    #[serde(default)]
    pub iss: Option<String>,

    /// Session ID (Clerk-issued tokens).
    #[serde(default)]
    pub sid: Option<String>,
}

impl Claims {
    /// Placeholder identity used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self {
            sub: "anonymous".to_string(),
            exp: 0,
            iss: None,
            sid: None,
        }
    }

    pub fn subject(&self) -> &str {
        &self.sub
    }
}
