//! OpenAI-compatible client against a stub upstream.

use std::convert::Infallible;

use axum::response::{IntoResponse, Sse};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sse_relay::config::UpstreamConfig;
use sse_relay::relay::{sink, Padding, Relay};
use sse_relay::upstream::openai::OpenAiBackend;
use sse_relay::upstream::{ChatMessage, CompletionBackend, CompletionRequest, UpstreamError};

fn chunk(content: &str) -> String {
    let body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }]
    });
    format!("data: {body}\n\n")
}

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::from(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    );
    for f in fragments {
        body.push_str(&chunk(f));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn backend(server: &MockServer) -> OpenAiBackend {
    let config = UpstreamConfig {
        api_base: format!("{}/", server.uri()),
        ..UpstreamConfig::default()
    };
    OpenAiBackend::new("test-key".to_string(), &config).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        request_id: "req-1".to_string(),
        model: None,
        messages: vec![ChatMessage::user("Pick a business area")],
        max_tokens: None,
        temperature: None,
    }
}

#[tokio::test]
async fn test_streams_deltas_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "llama-3.1-8b-instant",
            "stream": true,
            "messages": [{ "role": "user", "content": "Pick a business area" }]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hel", "lo\n", "wor", "ld"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<_> = backend(&server)
        .stream(request())
        .await
        .unwrap()
        .collect()
        .await;

    let text: String = chunks
        .into_iter()
        .map(|c| c.unwrap().delta.unwrap_or_default())
        .collect();
    assert_eq!(text, "Hello\nworld");
}

#[tokio::test]
async fn test_rate_limit_is_reported_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let result = backend(&server).stream(request()).await;
    assert!(matches!(result, Err(UpstreamError::RateLimited)));
}

#[tokio::test]
async fn test_api_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    match backend(&server).stream(request()).await {
        Err(UpstreamError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid api key");
        }
        other => panic!("expected Api error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_body_end_without_done_ends_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("{}{}", chunk("one "), chunk("two")), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let chunks: Vec<_> = backend(&server)
        .stream(request())
        .await
        .unwrap()
        .collect()
        .await;

    let text: String = chunks
        .into_iter()
        .map(|c| c.unwrap().delta.unwrap_or_default())
        .collect();
    assert_eq!(text, "one two");
}

#[tokio::test]
async fn test_in_band_error_ends_stream_with_error() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: {{\"error\":{{\"message\":\"model overloaded\"}}}}\n\n",
        chunk("partial\n")
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let chunks: Vec<_> = backend(&server)
        .stream(request())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_ref().unwrap().delta.as_deref(), Some("partial\n"));
    match &chunks[1] {
        Err(UpstreamError::Api { message, .. }) => assert_eq!(message, "model overloaded"),
        other => panic!("expected in-band error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_over_live_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["A\nB", "\nC"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let fragments = backend(&server).stream(request()).await.unwrap();
    let (mut sink, frames) = sink::channel(64);
    let outcome = Relay::new(Padding::DoubleBlank)
        .run(fragments, &mut sink)
        .await
        .unwrap();
    drop(sink);

    assert_eq!(outcome.lines_emitted, 3);
    assert!(!outcome.cancelled);

    let events: Vec<_> = frames.map(Ok::<_, Infallible>).collect().await;
    let body = Sse::new(futures::stream::iter(events))
        .into_response()
        .into_body();
    let wire = String::from_utf8(axum::body::to_bytes(body, usize::MAX).await.unwrap().to_vec())
        .unwrap();
    assert_eq!(
        wire,
        "data: A\n\ndata:  \n\ndata: B\n\ndata:  \n\ndata: C\n\nevent: done\ndata: [DONE]\n\n"
    );
}
