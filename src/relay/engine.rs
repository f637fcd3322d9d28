//! The relay loop: upstream fragments in, SSE events out.
//!
//! The loop suspends in exactly two places: waiting for the next fragment and
//! waiting for an event to be accepted by the sink. Both waits are raced
//! against the external cancellation signal; the fragment wait is also raced
//! against consumer disconnect. Every exit is an explicit transition to the
//! terminal state.
//!
//! Cancellation is best effort. Returning drops the fragment stream, which
//! closes the upstream HTTP response, but a provider may keep generating on
//! its side after that.

use std::future::Future;
use std::pin::Pin;

use axum::response::sse::Event;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::relay::framing::{Padding, SseEncoder};
use crate::relay::sink::{EventSink, SinkClosed};
use crate::relay::splitter::LineSplitter;
use crate::upstream::traits::{Chunk, FragmentStream, UpstreamError};

/// Terminal failures of a relay run.
///
/// A closed sink is not among them: the user is gone, so there is nobody to
/// report an error to, and the run ends as cancelled instead.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("upstream failed after {lines_emitted} lines: {source}")]
    UpstreamFailure {
        #[source]
        source: UpstreamError,
        lines_emitted: usize,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Content lines written (placeholders and control events excluded).
    pub lines_emitted: usize,
    /// The consumer disconnected or the cancellation signal fired.
    pub cancelled: bool,
}

/// Relay settings shared by every stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relay {
    encoder: SseEncoder,
}

/// Per-request state. Created when streaming begins, gone when it ends.
struct StreamState<'a, K, C> {
    sink: &'a mut K,
    cancel: Pin<&'a mut C>,
    encoder: SseEncoder,
    splitter: LineSplitter,
    lines_emitted: usize,
}

/// Why a run stopped before end-of-stream.
enum Halt {
    /// The cancellation signal fired or the consumer went away.
    Cancelled,
    Upstream(UpstreamError),
}

enum Step {
    Next(Option<Result<Chunk, UpstreamError>>),
    Disconnected,
    Cancelled,
}

impl Relay {
    pub fn new(padding: Padding) -> Self {
        Self {
            encoder: SseEncoder::new(padding),
        }
    }

    pub fn padding(&self) -> Padding {
        self.encoder.padding()
    }

    /// Relay until end-of-stream, error, or consumer disconnect.
    pub async fn run<K: EventSink>(
        &self,
        fragments: FragmentStream,
        sink: &mut K,
    ) -> Result<RelayOutcome, RelayError> {
        self.run_until(fragments, sink, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also stops when `cancel` resolves, even
    /// while a write is blocked on a consumer that has stopped reading.
    pub async fn run_until<K, C>(
        &self,
        fragments: FragmentStream,
        sink: &mut K,
        cancel: C,
    ) -> Result<RelayOutcome, RelayError>
    where
        K: EventSink,
        C: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);
        let mut state = StreamState {
            sink,
            cancel,
            encoder: self.encoder,
            splitter: LineSplitter::new(),
            lines_emitted: 0,
        };

        let halted = state.pump(fragments).await;
        match halted {
            Ok(()) => Ok(RelayOutcome {
                lines_emitted: state.lines_emitted,
                cancelled: false,
            }),
            Err(Halt::Cancelled) => Ok(RelayOutcome {
                lines_emitted: state.lines_emitted,
                cancelled: true,
            }),
            Err(Halt::Upstream(source)) => {
                warn!(
                    error = %source,
                    lines_emitted = state.lines_emitted,
                    "Upstream failed mid-stream"
                );
                state.fail(&source).await;
                Err(RelayError::UpstreamFailure {
                    source,
                    lines_emitted: state.lines_emitted,
                })
            }
        }
    }
}

impl<K, C> StreamState<'_, K, C>
where
    K: EventSink,
    C: Future<Output = ()> + Send,
{
    async fn pump(&mut self, mut fragments: FragmentStream) -> Result<(), Halt> {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.sink.closed() => Step::Disconnected,
                _ = self.cancel.as_mut() => Step::Cancelled,
                next = fragments.next() => Step::Next(next),
            };

            match step {
                Step::Next(Some(Ok(chunk))) => {
                    if let Some(text) = chunk.delta {
                        self.on_fragment(&text).await?;
                    }
                }
                Step::Next(Some(Err(source))) => return Err(Halt::Upstream(source)),
                Step::Next(None) => return self.on_end().await,
                Step::Disconnected => {
                    debug!(lines_emitted = self.lines_emitted, "Consumer disconnected");
                    return Err(Halt::Cancelled);
                }
                Step::Cancelled => {
                    debug!(lines_emitted = self.lines_emitted, "Stream cancelled");
                    return Err(Halt::Cancelled);
                }
            }
        }
    }

    async fn on_fragment(&mut self, text: &str) -> Result<(), Halt> {
        for line in self.splitter.push(text) {
            self.emit_line(&line).await?;
            if let Some(separator) = self.encoder.separator() {
                self.write(separator).await?;
            }
        }
        Ok(())
    }

    async fn on_end(&mut self) -> Result<(), Halt> {
        if let Some(last) = self.splitter.finish() {
            self.emit_line(&last).await?;
        }
        let done = self.encoder.done();
        self.write(done).await
    }

    /// Deliver the partial line already received, then the error marker.
    /// Best effort: the consumer may be gone as well.
    async fn fail(&mut self, source: &UpstreamError) {
        if let Some(tail) = self.splitter.finish() {
            if self.emit_line(&tail).await.is_err() {
                return;
            }
        }
        let marker = self.encoder.error(source.public_message());
        let _ = self.write(marker).await;
    }

    async fn emit_line(&mut self, line: &str) -> Result<(), Halt> {
        let event = self.encoder.line(line);
        self.write(event).await?;
        self.lines_emitted += 1;
        Ok(())
    }

    async fn write(&mut self, event: Event) -> Result<(), Halt> {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.as_mut() => None,
            sent = self.sink.send(event) => Some(sent),
        };

        match sent {
            Some(Ok(())) => Ok(()),
            Some(Err(SinkClosed)) => {
                debug!(lines_emitted = self.lines_emitted, "Consumer disconnected mid-write");
                Err(Halt::Cancelled)
            }
            None => {
                debug!(lines_emitted = self.lines_emitted, "Stream cancelled mid-write");
                Err(Halt::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::framing::render;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Records events; optionally disconnects after a number of writes.
    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Event>,
        disconnect_after: Option<usize>,
        write_attempts: usize,
    }

    impl RecordingSink {
        fn disconnecting_after(n: usize) -> Self {
            Self {
                disconnect_after: Some(n),
                ..Default::default()
            }
        }

        fn is_disconnected(&self) -> bool {
            matches!(self.disconnect_after, Some(n) if self.frames.len() >= n)
        }

        async fn text(&self) -> String {
            render(self.frames.clone()).await
        }

        /// Values of unnamed single-line `data:` events, in order.
        async fn values(&self) -> Vec<String> {
            self.text()
                .await
                .split("\n\n")
                .filter_map(|f| f.strip_prefix("data: "))
                .map(str::to_string)
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&mut self, event: Event) -> Result<(), SinkClosed> {
            self.write_attempts += 1;
            if self.is_disconnected() {
                return Err(SinkClosed);
            }
            self.frames.push(event);
            Ok(())
        }

        async fn closed(&self) {
            if self.is_disconnected() {
                return;
            }
            std::future::pending::<()>().await
        }
    }

    /// A consumer that is connected but never reads.
    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn send(&mut self, _event: Event) -> Result<(), SinkClosed> {
            std::future::pending().await
        }

        async fn closed(&self) {
            std::future::pending::<()>().await
        }
    }

    fn fragments(parts: &[&str]) -> FragmentStream {
        let items: Vec<Result<Chunk, UpstreamError>> =
            parts.iter().map(|p| Ok(Chunk::text(*p))).collect();
        futures::stream::iter(items).boxed()
    }

    /// Yields `parts`, counting how many were pulled.
    fn counted(parts: &[&str], pulled: Arc<AtomicUsize>) -> FragmentStream {
        let items: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
        futures::stream::iter(items)
            .map(move |p| {
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(Chunk::text(p))
            })
            .boxed()
    }

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let mut sink = RecordingSink::default();
        let outcome = Relay::new(Padding::None)
            .run(fragments(&["Hello", " world\n", "Second line"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            sink.text().await,
            "data: Hello world\n\ndata: Second line\n\nevent: done\ndata: [DONE]\n\n"
        );
        assert_eq!(
            outcome,
            RelayOutcome {
                lines_emitted: 2,
                cancelled: false
            }
        );
    }

    #[tokio::test]
    async fn test_single_fragment_without_newline_waits_for_end() {
        let mut sink = RecordingSink::default();
        let outcome = Relay::default()
            .run(fragments(&["no newline here"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.values().await, vec!["no newline here"]);
        assert_eq!(outcome.lines_emitted, 1);
    }

    #[tokio::test]
    async fn test_lone_newline_after_text() {
        let mut sink = RecordingSink::default();
        let outcome = Relay::default()
            .run(fragments(&["X", "\n"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.text().await, "data: X\n\nevent: done\ndata: [DONE]\n\n");
        assert_eq!(outcome.lines_emitted, 1);
    }

    #[tokio::test]
    async fn test_double_blank_padding_scenario() {
        let mut sink = RecordingSink::default();
        Relay::new(Padding::DoubleBlank)
            .run(fragments(&["A\nB\nC"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            sink.text().await,
            "data: A\n\ndata:  \n\ndata: B\n\ndata:  \n\ndata: C\n\nevent: done\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_emitted_values_reassemble_source_text() {
        let parts = ["The qu", "ick\nbro", "wn fox\n\njum", "ps", "\nover\n"];
        let mut sink = RecordingSink::default();
        Relay::default().run(fragments(&parts), &mut sink).await.unwrap();

        let source: String = parts.concat();
        let mut expected: Vec<&str> = source.split('\n').collect();
        // A trailing newline leaves an empty final segment that is never flushed.
        if expected.last() == Some(&"") {
            expected.pop();
        }
        assert_eq!(sink.values().await, expected);
    }

    #[tokio::test]
    async fn test_crlf_and_bare_cr_through_relay() {
        let mut sink = RecordingSink::default();
        let outcome = Relay::default()
            .run(fragments(&["a\r\nb", "\nx\ry\n"]), &mut sink)
            .await
            .unwrap();

        // CRLF ends a line like LF; a bare CR splits the value across
        // `data:` lines, which a browser rejoins with LF.
        assert_eq!(
            sink.text().await,
            "data: a\n\ndata: b\n\ndata: x\ndata: y\n\nevent: done\ndata: [DONE]\n\n"
        );
        assert_eq!(outcome.lines_emitted, 3);
    }

    #[tokio::test]
    async fn test_same_input_gives_identical_bytes() {
        let parts = ["a\n", "", "b", "c\n\nd"];
        let mut first = RecordingSink::default();
        let mut second = RecordingSink::default();
        let relay = Relay::new(Padding::DoubleBlank);

        relay.run(fragments(&parts), &mut first).await.unwrap();
        relay.run(fragments(&parts), &mut second).await.unwrap();

        assert_eq!(first.text().await, second.text().await);
    }

    #[tokio::test]
    async fn test_chunks_without_delta_are_skipped() {
        let items: Vec<Result<Chunk, UpstreamError>> = vec![
            Ok(Chunk::default()),
            Ok(Chunk::text("hi\n")),
            Ok(Chunk {
                delta: None,
                finish_reason: Some("stop".to_string()),
            }),
        ];
        let mut sink = RecordingSink::default();
        let outcome = Relay::default()
            .run(futures::stream::iter(items).boxed(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.values().await, vec!["hi"]);
        assert_eq!(outcome.lines_emitted, 1);
    }

    #[tokio::test]
    async fn test_disconnect_after_first_event_stops_reading() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let parts = ["one\n", "two\n", "three\n", "four\n"];
        let mut sink = RecordingSink::disconnecting_after(1);

        let outcome = Relay::default()
            .run(counted(&parts, pulled.clone()), &mut sink)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.lines_emitted, 1);
        assert_eq!(sink.values().await, vec!["one"]);
        // Closure is noticed before the next fragment is pulled.
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
        assert_eq!(sink.write_attempts, 1);
    }

    #[tokio::test]
    async fn test_failed_write_cancels_without_further_writes() {
        let mut sink = RecordingSink::disconnecting_after(1);
        // Both lines arrive in one fragment, so the second write is attempted.
        let outcome = Relay::default()
            .run(fragments(&["one\ntwo\nthree"]), &mut sink)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.lines_emitted, 1);
        assert_eq!(sink.write_attempts, 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_emits_error_marker() {
        let items: Vec<Result<Chunk, UpstreamError>> = vec![
            Ok(Chunk::text("partial answer\nmore")),
            Err(UpstreamError::RateLimited),
            Ok(Chunk::text("never seen\n")),
        ];
        let mut sink = RecordingSink::default();
        let err = Relay::default()
            .run(futures::stream::iter(items).boxed(), &mut sink)
            .await
            .unwrap_err();

        let RelayError::UpstreamFailure {
            source,
            lines_emitted,
        } = err;
        assert!(matches!(source, UpstreamError::RateLimited));
        assert_eq!(lines_emitted, 2);
        assert_eq!(
            sink.text().await,
            "data: partial answer\n\ndata: more\n\nevent: error\ndata: upstream rate limited\n\n"
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_partial_line_and_hides_details() {
        let items: Vec<Result<Chunk, UpstreamError>> = vec![
            Ok(Chunk::text("complete\npartial tail")),
            Err(UpstreamError::Malformed("{\"secret\":1}".to_string())),
        ];
        let mut sink = RecordingSink::default();
        Relay::new(Padding::DoubleBlank)
            .run(futures::stream::iter(items).boxed(), &mut sink)
            .await
            .unwrap_err();

        let text = sink.text().await;
        assert_eq!(
            text,
            "data: complete\n\ndata:  \n\ndata: partial tail\n\nevent: error\ndata: upstream completion failed\n\n"
        );
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let mut sink = RecordingSink::default();
        let never_ending: FragmentStream = futures::stream::pending().boxed();

        let outcome = Relay::default()
            .run_until(never_ending, &mut sink, async {})
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(sink.frames.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_blocked_write() {
        let mut sink = StalledSink;

        let relay = Relay::default();
        let run = relay.run_until(
            fragments(&["stuck\n", "behind\n"]),
            &mut sink,
            tokio::time::sleep(Duration::from_millis(100)),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("relay kept waiting on the sink after cancellation")
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.lines_emitted, 0);
    }
}
