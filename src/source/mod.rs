//! Frame sources
//!
//! A [`FrameSource`] wraps one upstream capture handle and yields
//! transport-ready JPEG frames. [`SourceOpener`] is the seam the session
//! engine opens handles through, so tests can substitute scripted sources
//! and deployments can swap capture backends.

pub mod ffmpeg;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::session::NoticeKind;

pub use ffmpeg::FfmpegOpener;

/// Capture failure
#[derive(Debug, Error)]
pub enum FrameError {
    /// The upstream capture could not be opened
    #[error("failed to open capture: {0}")]
    OpenFailed(String),

    /// No frame arrived in time
    #[error("frame read timed out")]
    Timeout,

    /// The upstream stream ended
    #[error("stream ended")]
    EndOfStream,

    /// A frame could not be encoded; the stream itself is still alive
    #[error("frame encode failed: {0}")]
    Encode(String),

    /// Transport failure talking to the capture handle
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether this error affects a single frame rather than the session
    pub fn is_per_frame(&self) -> bool {
        matches!(self, FrameError::Encode(_))
    }

    /// The notice kind broadcast to subscribers for this error
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            FrameError::OpenFailed(_) => NoticeKind::OpenFailed,
            FrameError::Timeout => NoticeKind::ReadTimeout,
            FrameError::EndOfStream => NoticeKind::StreamEnded,
            FrameError::Encode(_) => NoticeKind::EncodeFailed,
            FrameError::Io(_) => NoticeKind::UnexpectedFailure,
        }
    }
}

/// One open upstream capture handle
///
/// Implementations decode the upstream stream and yield frames already
/// encoded for transport. `close` must release the underlying resource and
/// is called on every session exit path, including cancellation.
#[async_trait]
pub trait FrameSource: Send {
    /// Pull the next encoded frame
    async fn next_frame(&mut self) -> Result<Bytes, FrameError>;

    /// Release the capture handle
    async fn close(&mut self);
}

/// Factory for capture handles
#[async_trait]
pub trait SourceOpener: Send + Sync {
    /// Open a capture handle for the given pull URL
    ///
    /// `quality` is the transport JPEG quality (0-100). Implementations
    /// should not return until the source is confirmed readable; the caller
    /// bounds the whole call with its open timeout.
    async fn open(&self, uri: &str, quality: u8) -> Result<Box<dyn FrameSource>, FrameError>;
}
