//! Incremental server-push frame decoder
//!
//! Backend streams are server-sent-event style records:
//!
//! ```text
//! event: delta
//! data: {"text": "function update() {"}
//!
//! ```
//!
//! A record is complete only once its blank-line terminator has been seen.
//! Network reads split records at arbitrary byte offsets (including inside a
//! multi-byte UTF-8 sequence), so incomplete trailing bytes stay buffered
//! until the next read. Bytes still pending when the input ends are an
//! incomplete record and are dropped, never decoded.

use crate::canonical::{CanonicalEvent, EventKind};
use serde_json::Value;

/// Default upper bound for one buffered record
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One undecoded record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// `event:` field
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: Option<String>,
    /// `id:` field
    pub id: Option<String>,
}

impl RawFrame {
    /// Parse the text of one record (without its terminator)
    #[must_use]
    pub fn parse(record: &str) -> Self {
        let mut frame = Self::default();
        let mut data: Vec<&str> = Vec::new();
        for line in record.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => frame.event = Some(value.trim().to_string()),
                "data" => data.push(value),
                "id" => frame.id = Some(value.trim().to_string()),
                _ => {}
            }
        }
        if !data.is_empty() {
            frame.data = Some(data.join("\n"));
        }
        frame
    }

    /// Keep-alive and comment-only records carry nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none()
    }

    /// Decode into a canonical event
    ///
    /// The tag comes from `event:`, or from the payload's `type` field when
    /// the record has no `event:` line.
    ///
    /// # Errors
    /// - `InvalidJson` if the data is present but not JSON
    /// - `MissingTag` if no tag can be found
    pub fn decode(&self) -> Result<CanonicalEvent, FrameError> {
        let data = match &self.data {
            Some(raw) => serde_json::from_str::<Value>(raw).map_err(|e| FrameError::InvalidJson {
                reason: e.to_string(),
                excerpt: excerpt(raw),
            })?,
            None => Value::Null,
        };
        let tag = match &self.event {
            Some(tag) if !tag.is_empty() => tag.clone(),
            _ => data
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(FrameError::MissingTag)?,
        };
        Ok(CanonicalEvent::new(EventKind::from_backend_tag(&tag), data))
    }
}

fn excerpt(raw: &str) -> String {
    raw.chars().take(80).collect()
}

/// Reasons a single record is skipped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Data is not valid JSON
    #[error("frame data is not json ({reason}): {excerpt}")]
    InvalidJson { reason: String, excerpt: String },

    /// Neither `event:` nor a `type` field
    #[error("frame has no event tag")]
    MissingTag,

    /// Record bytes are not UTF-8
    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    /// Record grew past the buffer limit without a terminator
    #[error("frame exceeds {limit} bytes without terminator")]
    Oversized { limit: usize },

    /// Input ended inside a record
    #[error("input ended inside a frame ({bytes} bytes unterminated)")]
    Incomplete { bytes: usize },
}

/// Splits a byte stream into complete records
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    /// Create a decoder with a per-record size limit
    #[inline]
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Bytes currently buffered awaiting a terminator
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append one read and return every record it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawFrame, FrameError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some((end, next)) = find_terminator(&self.buf) {
            let record: Vec<u8> = self.buf.drain(..next).take(end).collect();
            if let Some(frame) = to_frame(&record) {
                out.push(frame);
            }
        }

        if self.buf.len() > self.max_frame_bytes {
            self.buf.clear();
            out.push(Err(FrameError::Oversized {
                limit: self.max_frame_bytes,
            }));
        }
        out
    }

    /// End of input: discard any unterminated remainder
    ///
    /// A record is never emitted without its terminator. Returns
    /// `Incomplete` when something other than whitespace was pending.
    pub fn finish(&mut self) -> Option<FrameError> {
        let record = std::mem::take(&mut self.buf);
        (!record.iter().all(u8::is_ascii_whitespace)).then_some(FrameError::Incomplete {
            bytes: record.len(),
        })
    }
}

fn to_frame(record: &[u8]) -> Option<Result<RawFrame, FrameError>> {
    match std::str::from_utf8(record) {
        Ok(text) => {
            let frame = RawFrame::parse(text);
            (!frame.is_empty()).then_some(Ok(frame))
        }
        Err(_) => Some(Err(FrameError::InvalidUtf8)),
    }
}

/// Locate the first blank line: returns (record end, start of next record)
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some((i, i + 2)),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, i + 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}
