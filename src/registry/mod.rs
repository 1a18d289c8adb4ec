//! Session registry
//!
//! One long-lived [`SessionRegistry`] per process maps source ids to active
//! sessions. Viewers `acquire` to join a source (creating the session on
//! first use) and `release` when done; the registry guarantees a single
//! capture loop per source id and drains everything on shutdown.
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                  ┌───────────────────────────┐
//!                  │ sessions: HashMap<        │
//!                  │   SourceId,               │
//!                  │   Arc<Session> {          │
//!                  │     capture task,         │
//!                  │     SubscriberGroup,      │
//!                  │   }                       │
//!                  │ >                         │
//!                  └────────────┬──────────────┘
//!                               │
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!       [capture loop]     [Viewer]           [Viewer]
//!       source.next_frame  handle.next_event  handle.next_event
//!            │                  ▲                  ▲
//!            └── group.broadcast┴──────────────────┘
//! ```

pub mod error;
pub mod store;

pub use error::AcquireError;
pub use store::{SessionRegistry, SessionStats};
