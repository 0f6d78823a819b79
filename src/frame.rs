//! A single Server-Sent Event and its wire serialization.
//!
//! One frame renders as a block of `field: value` lines terminated by a
//! blank line, per the SSE text format:
//!
//! ```text
//! event: counter
//! data: event 3
//! id: 3
//!
//! ```
//!
//! Frames are immutable values built with consuming `with_*` setters and
//! consumed exactly once by the stream bridge.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error building an [`EventFrame`] from a value that cannot appear on
/// the wire.
///
/// The `event` and `id` fields are single-line scalars. A value containing
/// a line break (or NUL) would let a producer smuggle extra field lines
/// into the stream, so the setters reject it instead of emitting a
/// corrupted frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameBuildError {
    #[error("invalid character in `{field}` field")]
    InvalidCharacter { field: &'static str },
}

/// One Server-Sent Event.
///
/// All fields are optional; an empty frame is representable but serializes
/// to zero bytes (nothing is put on the wire). Multi-line `data` is legal
/// and becomes one `data:` line per segment when serialized.
///
/// # Example
/// ```
/// use ssebridge::EventFrame;
///
/// let frame = EventFrame::new()
///     .with_event("counter")?
///     .with_data("event 0")
///     .with_id("0")?;
///
/// assert_eq!(frame.serialize(), "event: counter\ndata: event 0\nid: 0\n\n");
/// # Ok::<(), ssebridge::FrameBuildError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl EventFrame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `event:` field (the event type a browser dispatches on).
    ///
    /// Fails if the value contains a line break or NUL.
    pub fn with_event(mut self, event: impl Into<String>) -> Result<Self, FrameBuildError> {
        let event = event.into();
        if event.contains(['\n', '\r', '\0']) {
            return Err(FrameBuildError::InvalidCharacter { field: "event" });
        }
        self.event = Some(event);
        Ok(self)
    }

    /// Set the `data:` field.
    ///
    /// The value may span multiple lines; serialization splits it into one
    /// `data:` line per segment, so no validation is needed here.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the `data:` field from any serializable value, JSON-encoded.
    pub fn with_json_data(mut self, data: impl Serialize) -> Result<Self, serde_json::Error> {
        self.data = Some(serde_json::to_string(&data)?);
        Ok(self)
    }

    /// Set the `id:` field (the client's `lastEventId`).
    ///
    /// Fails if the value contains a line break or NUL.
    pub fn with_id(mut self, id: impl Into<String>) -> Result<Self, FrameBuildError> {
        let id = id.into();
        if id.contains(['\n', '\r', '\0']) {
            return Err(FrameBuildError::InvalidCharacter { field: "id" });
        }
        self.id = Some(id);
        Ok(self)
    }

    /// Set the `retry:` field, the reconnect delay hint sent to the client.
    /// Written on the wire as whole milliseconds.
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The `event:` field, if set.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// The `data:` field, if set.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// The `id:` field, if set.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The `retry:` field, if set.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// True when no field is set. Such a frame serializes to nothing.
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none() && self.id.is_none() && self.retry.is_none()
    }

    /// Render the frame to its wire bytes.
    ///
    /// Total function: every constructible frame serializes. Field order is
    /// fixed (`event`, `data` lines, `id`, `retry`) and the frame ends with
    /// exactly one blank line, unless it is empty in which case the output
    /// is empty too.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();

        let mut put_field = |name: &str, value: &str| {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.put_u8(b'\n');
        };

        if let Some(event) = &self.event {
            put_field("event", event);
        }

        if let Some(data) = &self.data {
            // A logical payload of N lines becomes N `data:` lines. Split on
            // `\n` and strip one trailing `\r` per segment so `\r\n` payloads
            // frame identically.
            for segment in data.split('\n') {
                put_field("data", segment.strip_suffix('\r').unwrap_or(segment));
            }
        }

        if let Some(id) = &self.id {
            put_field("id", id);
        }

        if let Some(retry) = self.retry {
            put_field("retry", &retry.as_millis().to_string());
        }

        // Blank-line delimiter, only when the frame carried anything.
        if !buf.is_empty() {
            buf.put_u8(b'\n');
        }

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_full_frame() {
        let frame = EventFrame::new()
            .with_event("counter")
            .unwrap()
            .with_data("event 0")
            .with_id("0")
            .unwrap()
            .with_retry(Duration::from_millis(1500));

        assert_eq!(
            frame.serialize(),
            "event: counter\ndata: event 0\nid: 0\nretry: 1500\n\n"
        );
    }

    #[test]
    fn test_serialize_data_only() {
        let frame = EventFrame::new().with_data("hello");
        assert_eq!(frame.serialize(), "data: hello\n\n");
    }

    #[test]
    fn test_serialize_multiline_data() {
        let frame = EventFrame::new().with_data("line 1\nline 2\nline 3");
        assert_eq!(frame.serialize(), "data: line 1\ndata: line 2\ndata: line 3\n\n");
    }

    #[test]
    fn test_serialize_crlf_data() {
        let frame = EventFrame::new().with_data("a\r\nb");
        assert_eq!(frame.serialize(), "data: a\ndata: b\n\n");
    }

    #[test]
    fn test_serialize_preserves_trailing_empty_segment() {
        // "a\n" is two segments: "a" and "". Both get a data: line.
        let frame = EventFrame::new().with_data("a\n");
        assert_eq!(frame.serialize(), "data: a\ndata: \n\n");
    }

    #[test]
    fn test_serialize_empty_frame_is_empty() {
        assert_eq!(EventFrame::new().serialize(), "");
        assert!(EventFrame::new().is_empty());
    }

    #[test]
    fn test_scalar_fields_reject_line_breaks() {
        assert_eq!(
            EventFrame::new().with_event("a\nb").unwrap_err(),
            FrameBuildError::InvalidCharacter { field: "event" }
        );
        assert_eq!(
            EventFrame::new().with_id("1\r2").unwrap_err(),
            FrameBuildError::InvalidCharacter { field: "id" }
        );
        assert_eq!(
            EventFrame::new().with_id("1\02").unwrap_err(),
            FrameBuildError::InvalidCharacter { field: "id" }
        );
    }

    #[test]
    fn test_json_data() {
        let frame = EventFrame::new()
            .with_json_data(serde_json::json!({"n": 1}))
            .unwrap();
        assert_eq!(frame.serialize(), "data: {\"n\":1}\n\n");
    }

    #[test]
    fn test_counter_scenario_wire_format() {
        // Five counter events, concatenated, as a browser would receive them.
        let mut wire = String::new();
        for i in 0..5 {
            let frame = EventFrame::new()
                .with_event("counter")
                .unwrap()
                .with_data(format!("event {i}"))
                .with_id(i.to_string())
                .unwrap();
            wire.push_str(std::str::from_utf8(&frame.serialize()).unwrap());
        }

        let expected: String = (0..5)
            .map(|i| format!("event: counter\ndata: event {i}\nid: {i}\n\n"))
            .collect();
        assert_eq!(wire, expected);
    }
}
