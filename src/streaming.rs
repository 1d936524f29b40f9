//! Streaming wire-format helpers
//!
//! SSE frame construction for the OpenAI-compat surface, plus an
//! incremental decoder for upstreams that stream a JSON array over HTTP.
//! Byte chunks arrive without any alignment guarantee, so both decoders
//! buffer partial input across `feed` calls.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Stream terminator frame, `data: [DONE]\n\n`.
pub const SSE_DONE: &[u8] = b"data: [DONE]\n\n";

/// Encode a JSON value as one SSE data frame (`data: {json}\n\n`).
pub fn sse_frame<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// Incremental decoder for a streamed JSON array of objects.
///
/// The upstream emits `[ {..}, {..}, ... ]` in arbitrary byte chunks. Each
/// `feed` returns every object completed so far; the opening bracket must
/// be the first non-whitespace byte or decoding fails for the stream.
#[derive(Debug, Default)]
pub struct JsonArrayDecoder {
    buf: Vec<u8>,
    opened: bool,
    finished: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum JsonArrayError {
    #[error("expected '[' at start of stream, got {0:?}")]
    UnexpectedStart(char),
    #[error("malformed element in stream: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl JsonArrayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning completed array elements.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Value>, JsonArrayError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        let mut pos = 0;
        if !self.opened {
            while pos < self.buf.len() && self.buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == self.buf.len() {
                self.buf.clear();
                return Ok(out);
            }
            if self.buf[pos] != b'[' {
                return Err(JsonArrayError::UnexpectedStart(self.buf[pos] as char));
            }
            self.opened = true;
            pos += 1;
        }

        loop {
            // Skip whitespace, element separators and the closing bracket.
            while pos < self.buf.len()
                && (self.buf[pos].is_ascii_whitespace() || self.buf[pos] == b',')
            {
                pos += 1;
            }
            if pos < self.buf.len() && self.buf[pos] == b']' {
                self.finished = true;
                pos = self.buf.len();
                break;
            }

            match extract_object(&self.buf[pos..]) {
                Some(len) => {
                    let value: Value = serde_json::from_slice(&self.buf[pos..pos + len])?;
                    out.push(value);
                    pos += len;
                }
                None => break,
            }
        }

        self.buf.drain(..pos);
        Ok(out)
    }

    /// True once the closing bracket has been consumed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// True when the stream ended with an element still incomplete.
    pub fn has_partial(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Length of the first complete JSON object at the start of `data`, if any.
/// Scans brace depth with string and escape awareness.
fn extract_object(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut started = false;

    for (i, &b) in data.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                started = true;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if started && depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {
                if !started && !b.is_ascii_whitespace() {
                    // Not an object start; let serde report the error on
                    // whatever garbage this is.
                    return None;
                }
            }
        }
    }
    None
}
