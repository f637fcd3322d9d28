//! Route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Claims};
use crate::error::ServerError;
use crate::relay::sink;
use crate::relay::Padding;
use crate::server::prompts::{idea_messages, Visit};
use crate::server::routes::AppState;
use crate::upstream::{ChatMessage, CompletionRequest};

/// `GET /api`: stream a business idea.
pub async fn idea(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Result<Response, ServerError> {
    stream_completion(&state, &claims, idea_messages()).await
}

/// `POST /api`: stream a summary of a patient visit.
pub async fn consultation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(visit): Json<Visit>,
) -> Result<Response, ServerError> {
    visit.validate().map_err(ServerError::InvalidRequest)?;
    stream_completion(&state, &claims, visit.messages()).await
}

/// Open the upstream stream and hand it to a relay task.
///
/// Upstream errors at this point happen before any byte is written, so they
/// are still answered with a plain HTTP error.
async fn stream_completion(
    state: &Arc<AppState>,
    claims: &Claims,
    messages: Vec<ChatMessage>,
) -> Result<Response, ServerError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("stream", request_id = %request_id, subject = %claims.subject());

    let request = CompletionRequest {
        request_id: request_id.clone(),
        model: None,
        messages,
        max_tokens: None,
        temperature: None,
    };

    let fragments = state
        .backend
        .stream(request)
        .instrument(span.clone())
        .await
        .inspect_err(|e| {
            warn!(request_id = %request_id, error = %e, "Upstream refused stream");
        })?;

    let (mut sink, frames) = sink::channel(state.config.server.channel_capacity);
    let relay = state.relay;
    let deadline = state.config.server.stream_deadline();
    let keep_alive = state.config.server.keep_alive();
    let metrics = state.metrics.clone();

    metrics.stream_started();
    tokio::spawn(
        async move {
            info!(padding = ?relay.padding(), "Relay started");
            let cancel = async move {
                match deadline {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };

            let result = relay.run_until(fragments, &mut sink, cancel).await;
            metrics.stream_finished(&result);
            match &result {
                Ok(outcome) => info!(
                    lines_emitted = outcome.lines_emitted,
                    cancelled = outcome.cancelled,
                    "Relay finished"
                ),
                Err(e) => warn!(error = %e, "Relay ended with error"),
            }
        }
        .instrument(span),
    );

    let events = Sse::new(frames.map(Ok::<_, Infallible>));
    let mut response = match keep_alive {
        Some(interval) => events
            .keep_alive(KeepAlive::new().interval(interval).text("keep-alive"))
            .into_response(),
        None => events.into_response(),
    };
    // Stop nginx-style proxies from buffering the stream.
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub backend: String,
    pub model: String,
    pub padding: Padding,
    pub auth: bool,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        backend: state.backend.name().to_string(),
        model: state.backend.default_model().to_string(),
        padding: state.relay.padding(),
        auth: state.verifier.is_some(),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
