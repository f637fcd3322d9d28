//! Prometheus metrics for relay streams.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::relay::{RelayError, RelayOutcome};

/// Counters for every stream the server relays.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    streams: IntCounter,
    lines: IntCounter,
    cancelled: IntCounter,
    upstream_failures: IntCounter,
    active: IntGauge,
}

impl RelayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let streams = IntCounter::new("sse_relay_streams_total", "Streams opened")?;
        let lines = IntCounter::new("sse_relay_lines_emitted_total", "Content lines emitted")?;
        let cancelled = IntCounter::new(
            "sse_relay_cancelled_total",
            "Streams ended by client disconnect or deadline",
        )?;
        let upstream_failures = IntCounter::new(
            "sse_relay_upstream_failures_total",
            "Streams ended by an upstream error",
        )?;
        let active = IntGauge::new("sse_relay_active_streams", "Streams currently open")?;

        registry.register(Box::new(streams.clone()))?;
        registry.register(Box::new(lines.clone()))?;
        registry.register(Box::new(cancelled.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;
        registry.register(Box::new(active.clone()))?;

        Ok(Self {
            registry,
            streams,
            lines,
            cancelled,
            upstream_failures,
            active,
        })
    }

    pub fn stream_started(&self) {
        self.streams.inc();
        self.active.inc();
    }

    /// Record how a stream ended.
    pub fn stream_finished(&self, result: &Result<RelayOutcome, RelayError>) {
        self.active.dec();
        match result {
            Ok(outcome) => {
                self.lines.inc_by(outcome.lines_emitted as u64);
                if outcome.cancelled {
                    self.cancelled.inc();
                }
            }
            Err(RelayError::UpstreamFailure { lines_emitted, .. }) => {
                self.lines.inc_by(*lines_emitted as u64);
                self.upstream_failures.inc();
            }
        }
    }

    /// Render in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
