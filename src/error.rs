//! Crate-level error type
//!
//! Component-specific errors live next to their components
//! ([`AcquireError`](crate::registry::AcquireError),
//! [`FrameError`](crate::source::FrameError)); this is the umbrella type
//! returned by the server entry points.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for server operations
#[derive(Debug, Error)]
pub enum Error {
    /// Session acquisition failed
    #[error(transparent)]
    Acquire(#[from] crate::registry::AcquireError),

    /// Capture source failure
    #[error(transparent)]
    Frame(#[from] crate::source::FrameError),

    /// Underlying socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound message could not be serialized
    #[error("message encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
