//! Incremental SSE relay.
//!
//! - [`splitter`]: Accumulates fragments into complete lines
//! - [`framing`]: SSE event construction and padding variants
//! - [`sink`]: Downstream sink trait and the channel-backed sink
//! - [`engine`]: The relay loop and its cancellation semantics

pub mod engine;
pub mod framing;
pub mod sink;
pub mod splitter;

pub use engine::{Relay, RelayError, RelayOutcome};
pub use framing::{Padding, SseEncoder};
pub use sink::{EventSink, SinkClosed};
