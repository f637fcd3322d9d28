//! OpenAI-compatible streaming backend.
//!
//! Talks to any `/chat/completions` endpoint that speaks the OpenAI streaming
//! dialect (Groq by default). The response body is itself an SSE stream of
//! JSON chunks terminated by `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Stream, StreamExt};
use reqwest::{Client, StatusCode};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::traits::{
    ChatMessage, Chunk, CompletionBackend, CompletionRequest, FragmentStream, UpstreamError,
};
use crate::config::UpstreamConfig;

/// Payload that ends an upstream stream.
const DONE: &str = "[DONE]";

/// OpenAI-compatible streaming backend.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiBackend {
    /// Build the backend and its HTTP client. Called once at startup.
    pub fn new(api_key: String, config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        // No overall timeout: a completion stream may legitimately run for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Streaming chunk (`chat.completion.chunk`).
#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChoiceBody>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChoiceBody {
    #[serde(default)]
    delta: DeltaBody,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, UpstreamError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = ChatCompletionBody {
            model,
            messages: &request.messages,
            stream: true,
            max_tokens: request.max_tokens.or(self.max_tokens),
            temperature: request.temperature.or(self.temperature),
        };

        info!(
            request_id = %request.request_id,
            model,
            messages = request.messages.len(),
            "Opening upstream completion stream"
        );

        let req = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body);

        let mut events =
            EventSource::new(req).map_err(|e| UpstreamError::Http(e.to_string()))?;
        // A completion cannot be resumed, so a dropped stream is an error, not a reconnect.
        events.set_retry_policy(Box::new(Never));

        // Wait for the response head so refusals surface before anything is relayed.
        let first = match events.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(message)) => Some(Ok(message)),
            Some(Err(e)) => return Err(refusal(e).await),
            None => {
                return Err(UpstreamError::Http(
                    "upstream closed before responding".to_string(),
                ))
            }
        };

        Ok(chunk_stream(futures::stream::iter(first).chain(events)))
    }
}

/// Map a failure to open the stream, reading the error body when there is one.
async fn refusal(error: EventSourceError) -> UpstreamError {
    match error {
        EventSourceError::InvalidStatusCode(StatusCode::TOO_MANY_REQUESTS, _) => {
            UpstreamError::RateLimited
        }
        EventSourceError::InvalidStatusCode(status, response) => UpstreamError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        },
        other => stream_error(other),
    }
}

fn stream_error(error: EventSourceError) -> UpstreamError {
    match error {
        EventSourceError::Transport(e) => UpstreamError::from(e),
        EventSourceError::InvalidStatusCode(status, _) => UpstreamError::Api {
            status: status.as_u16(),
            message: String::new(),
        },
        other => UpstreamError::Malformed(other.to_string()),
    }
}

/// Decode one `data:` payload.
fn parse_chunk(data: &str) -> Result<Chunk, UpstreamError> {
    let body: ChunkBody = serde_json::from_str(data)
        .map_err(|e| UpstreamError::Malformed(format!("{e}: {data}")))?;

    if let Some(error) = body.error {
        return Err(UpstreamError::Api {
            status: StatusCode::OK.as_u16(),
            message: error.message,
        });
    }

    Ok(body
        .choices
        .into_iter()
        .next()
        .map(|choice| Chunk {
            delta: choice.delta.content,
            finish_reason: choice.finish_reason,
        })
        .unwrap_or_default())
}

/// Turn upstream SSE events into chunks. `[DONE]` or the end of the body
/// ends the stream.
fn chunk_stream<S>(events: S) -> FragmentStream
where
    S: Stream<Item = Result<Event, EventSourceError>> + Send + 'static,
{
    events
        .take_while(|item| {
            let finished = match item {
                Ok(Event::Message(message)) => message.data == DONE,
                Err(EventSourceError::StreamEnded) => true,
                _ => false,
            };
            if finished {
                debug!("Upstream stream finished");
            }
            future::ready(!finished)
        })
        .filter_map(|item| async move {
            match item {
                Ok(Event::Open) => None,
                Ok(Event::Message(message)) => Some(parse_chunk(&message.data)),
                Err(e) => Some(Err(stream_error(e))),
            }
        })
        .boxed()
}
