use crate::event::{decode_frame, StreamEvent};
use serde::Serialize;

/// Counters kept while decoding one stream; surfaced through the engine's
/// stats so decode loss stays observable.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub dropped: u64,
    pub unknown: u64,
}

/// Incremental decoder for the line-delimited `data:` frame stream.
///
/// Chunks arrive with arbitrary boundaries, so the decoder keeps a rolling
/// byte buffer and only decodes complete lines; a partial trailing line stays
/// buffered until the next chunk. Working in bytes means a UTF-8 sequence
/// split across chunks is reassembled before any text handling.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Feed one transport chunk; returns every event completed by it.
    ///
    /// A malformed frame is logged (length and error only, never content) and
    /// dropped; decoding never fails and never aborts the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(line) = self.take_line() {
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Drop any partial trailing line. Used when a turn is aborted so a
    /// half-received frame is never carried into a later decode.
    pub fn discard_partial(&mut self) {
        self.buf.clear();
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<StreamEvent> {
        if line.is_empty() {
            return None;
        }

        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(err) => {
                self.stats.dropped += 1;
                tracing::warn!(len = line.len(), %err, "dropping non-UTF-8 frame line");
                return None;
            }
        };

        let Some(body) = text.strip_prefix("data:") else {
            // SSE metadata (`event:`, `id:`, `retry:`) and `:` comments carry
            // nothing for us.
            if !text.starts_with(':')
                && !text.starts_with("event:")
                && !text.starts_with("id:")
                && !text.starts_with("retry:")
            {
                tracing::trace!(len = text.len(), "skipping non-data stream line");
            }
            return None;
        };

        match decode_frame(body.trim_start()) {
            Ok(event) => {
                self.stats.frames += 1;
                if matches!(event, StreamEvent::Unknown { .. }) {
                    self.stats.unknown += 1;
                }
                Some(event)
            }
            Err(err) => {
                self.stats.dropped += 1;
                tracing::warn!(len = body.len(), %err, "dropping malformed frame");
                None
            }
        }
    }
}
