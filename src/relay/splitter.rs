//! Line accumulation across fragment boundaries.
//!
//! Upstream fragments are cut wherever the tokenizer happens to cut them, so a
//! display line can span several fragments and one fragment can carry several
//! lines. The splitter holds the unterminated tail between calls.

use std::mem;

/// Accumulates fragments and yields complete lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    /// The current unterminated line.
    pending: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning every line it completes (in order).
    ///
    /// A fragment with `k` newlines completes exactly `k` lines: the pending
    /// line extended by the first segment, then the `k - 1` middle segments.
    /// The last segment becomes the new pending line.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }

        let mut segments = fragment.split('\n');
        // `split` always yields at least one segment.
        if let Some(first) = segments.next() {
            self.pending.push_str(first);
        }

        let mut lines = Vec::new();
        for segment in segments {
            let mut complete = mem::replace(&mut self.pending, segment.to_owned());
            strip_carriage_return(&mut complete);
            lines.push(complete);
        }
        lines
    }

    /// Flush the trailing partial line at end-of-stream.
    ///
    /// Returns `None` when nothing is pending, so a source ending in `\n`
    /// produces no extra empty event.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut last = mem::take(&mut self.pending);
        strip_carriage_return(&mut last);
        Some(last)
    }

    /// The text received since the last newline.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

// CRLF input: the `\r` belongs to the terminator, not the line.
fn strip_carriage_return(line: &mut String) {
    if line.ends_with('\r') {
        line.pop();
    }
}
