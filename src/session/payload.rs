//! Frame payloads and stream notices
//!
//! The two message kinds a session fans out to its subscribers. Payloads are
//! transient: they exist only long enough to land on each subscriber's
//! outbound queue (or be dropped under backpressure).

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// One encoded frame ready for delivery
///
/// Cheap to clone: `Bytes` is reference-counted, so every subscriber shares
/// the same allocation.
#[derive(Debug, Clone)]
pub struct FramePayload {
    /// Monotonically increasing per-session sequence number (starts at 1)
    pub seq: u64,
    /// Wall-clock capture time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Encoded image data (JPEG)
    pub data: Bytes,
}

impl FramePayload {
    /// Create a payload stamped with the current wall-clock time
    pub fn new(seq: u64, data: Bytes) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            seq,
            timestamp_ms,
            data,
        }
    }
}

/// Classification of a stream failure notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// No configuration record for the requested source id
    NotFound,
    /// The source exists but its active flag is off
    Inactive,
    /// The upstream capture could not be opened
    OpenFailed,
    /// No frame arrived within the read timeout
    ReadTimeout,
    /// The upstream stream ended
    StreamEnded,
    /// A single frame failed to encode (the stream continues)
    EncodeFailed,
    /// Any other unrecoverable failure
    UnexpectedFailure,
}

impl NoticeKind {
    /// Stable wire identifier for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::NotFound => "not-found",
            NoticeKind::Inactive => "inactive",
            NoticeKind::OpenFailed => "open-failed",
            NoticeKind::ReadTimeout => "read-timeout",
            NoticeKind::StreamEnded => "stream-ended",
            NoticeKind::EncodeFailed => "encode-failed",
            NoticeKind::UnexpectedFailure => "unexpected-failure",
        }
    }

    /// Whether a notice of this kind ends the session
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NoticeKind::EncodeFailed)
    }
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error notice delivered to subscribers out of band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNotice {
    /// Failure classification
    pub kind: NoticeKind,
    /// Human-readable detail
    pub message: String,
}

impl StreamNotice {
    /// Create a notice
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether this notice ends the session
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

impl std::fmt::Display for StreamNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(NoticeKind::StreamEnded.is_terminal());
        assert!(NoticeKind::ReadTimeout.is_terminal());
        assert!(NoticeKind::OpenFailed.is_terminal());
        assert!(!NoticeKind::EncodeFailed.is_terminal());
    }

    #[test]
    fn test_notice_display() {
        let notice = StreamNotice::new(NoticeKind::StreamEnded, "upstream closed");

        assert_eq!(notice.to_string(), "stream-ended: upstream closed");
    }

    #[test]
    fn test_payload_clone_shares_data() {
        let payload = FramePayload::new(1, Bytes::from_static(b"\xff\xd8\xff\xd9"));
        let copy = payload.clone();

        // Bytes clones share the underlying allocation
        assert_eq!(copy.data.as_ptr(), payload.data.as_ptr());
        assert_eq!(copy.seq, 1);
    }
}
