//! # camrelay
//!
//! Relays live video from pull-based sources (RTSP cameras) to many
//! WebSocket viewers. Each source is decoded exactly once by a per-source
//! capture loop; frames are fanned out to every subscriber through bounded
//! queues that drop under backpressure instead of stalling the loop.
//!
//! # Architecture
//!
//! - [`store`]: source configuration (the external collaborator boundary)
//! - [`source`]: capture handles; production backend spawns `ffmpeg`
//! - [`session`]: per-source capture loop, lifecycle, subscriber fan-out
//! - [`registry`]: process-wide map of active sessions
//! - [`server`]: WebSocket accept loop and per-viewer connection adapter
//! - [`protocol`]: JSON wire messages
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use camrelay::config::RelayConfig;
//! use camrelay::server::{RelayServer, ServerConfig};
//! use camrelay::source::FfmpegOpener;
//! use camrelay::store::{MemoryConfigStore, SourceDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> camrelay::Result<()> {
//!     let store = Arc::new(MemoryConfigStore::new());
//!     store
//!         .insert(SourceDescriptor::new(
//!             "cam1",
//!             "Front door",
//!             "rtsp://192.168.1.10:554/stream1",
//!         ))
//!         .await;
//!
//!     let server = RelayServer::new(
//!         ServerConfig::default(),
//!         RelayConfig::default(),
//!         store,
//!         Arc::new(FfmpegOpener::new()),
//!     );
//!
//!     // Viewers connect to ws://host:8080/stream/cam1
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;
pub mod store;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use registry::{AcquireError, SessionRegistry};
pub use server::{RelayServer, ServerConfig};
pub use session::{
    FramePayload, NoticeKind, SessionState, StreamNotice, SubscriberEvent, SubscriberHandle,
};
pub use store::{ConfigStore, MemoryConfigStore, SourceDescriptor, SourceId};
