//! AWS event-stream binary framing codec
//!
//! Bedrock streaming responses arrive as `application/vnd.amazon.eventstream`
//! frames. Each frame carries typed headers and a payload:
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32]
//! [headers: name_len u8, name, value_type u8, value ...]
//! [payload][message_crc u32]
//! ```
//!
//! Frames are routed by the `:event-type` header value; payloads are never
//! probed blindly. The decoder buffers partial frames across `feed` calls.
//! CRC words are carried but not re-verified: the stream arrives over TLS
//! and a corrupt frame fails JSON decoding downstream anyway.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on a single frame; anything larger is treated as corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum EventStreamError {
    #[error("malformed event-stream frame: {0}")]
    Malformed(String),
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct EventStreamMessage {
    pub headers: Vec<EventHeader>,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct EventHeader {
    pub name: String,
    pub value: EventHeaderValue,
}

#[derive(Debug, Clone)]
pub enum EventHeaderValue {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl EventStreamMessage {
    /// Value of the `:event-type` header, when present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| {
            if h.name == name {
                match &h.value {
                    EventHeaderValue::String(s) => Some(s.as_str()),
                    _ => None,
                }
            } else {
                None
            }
        })
    }
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every frame completed so far.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<EventStreamMessage>, EventStreamError> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < PRELUDE_LEN {
                break;
            }
            let total_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;
            let headers_len =
                u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

            if total_len < PRELUDE_LEN + CRC_LEN || total_len > MAX_FRAME_LEN {
                return Err(EventStreamError::Malformed(format!(
                    "implausible frame length {total_len}"
                )));
            }
            if headers_len + PRELUDE_LEN + CRC_LEN > total_len {
                return Err(EventStreamError::Malformed(format!(
                    "headers length {headers_len} exceeds frame length {total_len}"
                )));
            }
            if self.buf.len() < total_len {
                break;
            }

            let mut frame = self.buf.split_to(total_len).freeze();
            frame.advance(PRELUDE_LEN);
            let header_bytes = frame.split_to(headers_len);
            let payload_len = total_len - PRELUDE_LEN - headers_len - CRC_LEN;
            let payload = frame.split_to(payload_len);

            out.push(EventStreamMessage {
                headers: parse_headers(header_bytes)?,
                payload,
            });
        }

        Ok(out)
    }

    /// True when no partial frame remains buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn parse_headers(mut data: Bytes) -> Result<Vec<EventHeader>, EventStreamError> {
    let mut headers = Vec::new();

    while data.has_remaining() {
        let name_len = data.get_u8() as usize;
        if data.remaining() < name_len + 1 {
            return Err(EventStreamError::Malformed("truncated header name".into()));
        }
        let name = String::from_utf8(data.split_to(name_len).to_vec())
            .map_err(|_| EventStreamError::Malformed("header name is not UTF-8".into()))?;

        let value_type = data.get_u8();
        let value = match value_type {
            0 => EventHeaderValue::Bool(true),
            1 => EventHeaderValue::Bool(false),
            2 => {
                ensure_remaining(&data, 1)?;
                EventHeaderValue::Byte(data.get_u8())
            }
            3 => {
                ensure_remaining(&data, 2)?;
                EventHeaderValue::Int16(data.get_i16())
            }
            4 => {
                ensure_remaining(&data, 4)?;
                EventHeaderValue::Int32(data.get_i32())
            }
            5 => {
                ensure_remaining(&data, 8)?;
                EventHeaderValue::Int64(data.get_i64())
            }
            6 | 7 => {
                ensure_remaining(&data, 2)?;
                let len = data.get_u16() as usize;
                ensure_remaining(&data, len)?;
                let bytes = data.split_to(len);
                if value_type == 7 {
                    EventHeaderValue::String(String::from_utf8(bytes.to_vec()).map_err(|_| {
                        EventStreamError::Malformed("string header is not UTF-8".into())
                    })?)
                } else {
                    EventHeaderValue::Bytes(bytes)
                }
            }
            8 => {
                ensure_remaining(&data, 8)?;
                EventHeaderValue::Timestamp(data.get_i64())
            }
            9 => {
                ensure_remaining(&data, 16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&data.split_to(16));
                EventHeaderValue::Uuid(uuid)
            }
            t => {
                return Err(EventStreamError::Malformed(format!(
                    "unknown header value type {t}"
                )))
            }
        };

        headers.push(EventHeader { name, value });
    }

    Ok(headers)
}

fn ensure_remaining(data: &Bytes, needed: usize) -> Result<(), EventStreamError> {
    if data.remaining() < needed {
        Err(EventStreamError::Malformed("truncated header value".into()))
    } else {
        Ok(())
    }
}

/// Encode a frame with string headers. CRC words are written as zeros; the
/// decoder does not verify them. Used by tests and mock upstreams.
pub fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7u8);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = PRELUDE_LEN + header_bytes.len() + payload.len() + CRC_LEN;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}
