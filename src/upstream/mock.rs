//! Mock backend for local runs and tests.
//!
//! Streams a canned reply word by word so the relay can be exercised
//! without an API key.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::traits::{Chunk, CompletionBackend, CompletionRequest, FragmentStream, UpstreamError};

/// Mock backend that simulates LLM streaming.
pub struct MockBackend {
    /// Fragments to send; `None` means "derive a reply from the prompt".
    script: Option<Vec<String>>,
    /// Delay between fragments.
    delay: Duration,
    /// Fail mid-stream after this many fragments.
    fail_after: Option<usize>,
    /// Refuse to open the stream with this HTTP status.
    reject_status: Option<u16>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            script: None,
            delay: Duration::from_millis(30),
            fail_after: None,
            reject_status: None,
        }
    }

    /// Send exactly these fragments, with no delay.
    pub fn scripted<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Some(fragments.into_iter().map(Into::into).collect()),
            delay: Duration::ZERO,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_after(mut self, fragments: usize) -> Self {
        self.fail_after = Some(fragments);
        self
    }

    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_status = Some(status);
        self
    }

    fn reply_for(request: &CompletionRequest) -> Vec<String> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let preview: String = prompt.chars().take(80).collect();

        let reply = format!(
            "### Mock reply\n\nYou asked: \"{}\"\n\n\
             This text is streamed word by word by the mock backend.\n\
             Run without --mock and set GROQ_API_KEY for real completions.",
            preview.replace('\n', " ")
        );

        // Keep whitespace attached so the reassembled text is identical.
        let mut fragments = Vec::new();
        let mut current = String::new();
        for ch in reply.chars() {
            current.push(ch);
            if ch == ' ' || ch == '\n' {
                fragments.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            fragments.push(current);
        }
        fragments
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, UpstreamError> {
        match self.reject_status {
            Some(429) => return Err(UpstreamError::RateLimited),
            Some(status) => {
                return Err(UpstreamError::Api {
                    status,
                    message: "rejected by mock backend".to_string(),
                })
            }
            None => {}
        }

        let fragments = self
            .script
            .clone()
            .unwrap_or_else(|| Self::reply_for(&request));
        let delay = self.delay;
        let fail_after = self.fail_after;

        let stream = futures::stream::iter(fragments.into_iter().enumerate())
            .then(move |(i, text)| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fail_after.is_some_and(|n| i >= n) {
                    Err(UpstreamError::Http("mock connection reset".to_string()))
                } else {
                    Ok(Chunk::text(text))
                }
            });

        Ok(stream.boxed())
    }
}
