//! Downstream event sinks.
//!
//! The relay writes events to an [`EventSink`]. In the server the sink is the
//! sending half of a bounded channel whose receiving half feeds an axum `Sse`
//! response; when the client goes away axum drops the body, the receiver goes
//! with it, and the sink observes closure.

use async_trait::async_trait;
use axum::response::sse::Event;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The downstream consumer is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event sink closed")]
pub struct SinkClosed;

/// A writable channel to exactly one downstream consumer.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Write one event. Resolves once the event is accepted.
    async fn send(&mut self, event: Event) -> Result<(), SinkClosed>;

    /// Resolves when the consumer has disconnected. Must stay pending while
    /// the consumer is alive.
    async fn closed(&self);
}

/// Sink backed by a bounded `mpsc` channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

/// Create a sink and the stream of events it feeds.
pub fn channel(capacity: usize) -> (ChannelSink, ReceiverStream<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, ReceiverStream::new(rx))
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: Event) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
