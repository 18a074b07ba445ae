//! Incremental Server-Sent Events frame parser.
//!
//! Chunks arrive in arbitrary sizes, not aligned to lines or to UTF-8 code
//! points. The parser keeps a byte tail for an incomplete UTF-8 sequence and a
//! text tail for an incomplete line, and only ever interprets complete lines.
//!
//! A frame is dispatched as soon as its `data:` line is seen; the blank line
//! that terminates an event in strict SSE is not required. The event name is
//! whatever the most recent `event:` line set since the previous dispatch,
//! defaulting to `"message"`.

use serde_json::Value;

/// Event name used when the server does not send an `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched `(event, data)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    /// The `data:` payload parsed as JSON, or the raw text as a JSON string
    /// when it is not valid JSON.
    pub data: Value,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Streaming UTF-8 decoder.
///
/// Holds back a trailing incomplete sequence until the next chunk completes
/// it. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, appending complete characters to `out`.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut String) {
        let owned;
        let mut bytes: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            owned = std::mem::take(&mut self.pending);
            &owned
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[bad..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Line-oriented SSE parser.
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: Utf8Decoder,
    buffer: String,
    current_event: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the response body, returning every frame completed
    /// by this chunk, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.decoder.decode_into(chunk, &mut self.buffer);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut frames = Vec::new();
        for line in complete.split('\n') {
            if let Some(frame) = self.process_line(line.strip_suffix('\r').unwrap_or(line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes and characters still buffered (incomplete line or code point).
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + self.decoder.pending_len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if let Some(name) = field_value(line, "event") {
            self.current_event = name.trim().to_string();
            return None;
        }
        let raw = field_value(line, "data")?;
        let data = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let event = match std::mem::take(&mut self.current_event) {
            name if name.is_empty() => DEFAULT_EVENT.to_string(),
            name => name,
        };
        Some(SseFrame { event, data })
    }
}

/// Value of `field: value` (one optional space after the colon).
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
