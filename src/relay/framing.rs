//! SSE event construction.
//!
//! Every value goes out as one or more `data: ` lines followed by a blank
//! line. Control events (termination, error) are named so a browser's
//! `onmessage` handler never renders them as content.

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

/// Payload of the termination event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Display-spacing convention between emitted lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Padding {
    /// `data: <line>\n\n` per line, nothing else.
    #[default]
    None,
    /// Each newline-terminated line is followed by a `data:  ` placeholder
    /// event, so clients that concatenate event data keep paragraph spacing.
    DoubleBlank,
}

/// Builds the events a relay writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SseEncoder {
    padding: Padding,
}

impl SseEncoder {
    pub fn new(padding: Padding) -> Self {
        Self { padding }
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// A single content line. An empty line yields `data: \n\n`.
    pub fn line(&self, value: &str) -> Event {
        with_data(Event::default(), value)
    }

    /// The placeholder that follows a newline-terminated line, if any.
    pub fn separator(&self) -> Option<Event> {
        match self.padding {
            Padding::None => None,
            Padding::DoubleBlank => Some(Event::default().data(" ")),
        }
    }

    /// Stream-termination marker.
    pub fn done(&self) -> Event {
        Event::default().event("done").data(DONE_SENTINEL)
    }

    /// Terminal error marker.
    pub fn error(&self, message: &str) -> Event {
        with_data(Event::default().event("error"), message)
    }
}

/// axum splits `data` on LF but refuses CR, so a CR also starts a new
/// `data:` line.
fn with_data(event: Event, value: &str) -> Event {
    if value.contains('\r') {
        event.data(value.replace('\r', "\n"))
    } else {
        event.data(value)
    }
}

/// Render events exactly as the response body carries them.
#[cfg(test)]
pub(crate) async fn render(events: impl IntoIterator<Item = Event>) -> String {
    use axum::response::{IntoResponse, Sse};

    let events: Vec<_> = events
        .into_iter()
        .map(Ok::<_, std::convert::Infallible>)
        .collect();
    let body = Sse::new(futures::stream::iter(events))
        .into_response()
        .into_body();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
