//! WebSocket server
//!
//! The outward-facing layer: a TCP accept loop that upgrades each viewer to
//! a WebSocket and runs one [`Connection`] adapter per viewer against the
//! shared [`SessionRegistry`](crate::registry::SessionRegistry).

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RelayServer;
