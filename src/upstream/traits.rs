//! Backend trait definitions.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the upstream completion API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Malformed chunk: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Wording that is safe to show a browser. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            UpstreamError::RateLimited => "upstream rate limited",
            _ => "upstream completion failed",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Http(e.to_string())
    }
}

/// A chat message (OpenAI-compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A streaming completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Request ID for log correlation.
    pub request_id: String,
    /// Model override; the backend default is used when `None`.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// One incremental piece of generated output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Text delta. `None` for role-only or finish chunks.
    pub delta: Option<String>,
    pub finish_reason: Option<String>,
}

impl Chunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            finish_reason: None,
        }
    }
}

/// Lazy sequence of chunks. Ends when the upstream signals completion;
/// dropping it releases the upstream connection.
pub type FragmentStream = BoxStream<'static, Result<Chunk, UpstreamError>>;

/// An LLM API that can stream chat completions.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name for logging and `/health`.
    fn name(&self) -> &'static str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Open a streaming completion. Errors here happen before any output.
    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, UpstreamError>;
}
