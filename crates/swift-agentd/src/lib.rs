//! Credential caching daemon for Swift object storage.
//!
//! The daemon holds passwords, authenticators and cluster capability
//! documents in memory and serves them to short-lived tools over a Unix
//! socket. Requests are single lines routed through a fixed verb table; see
//! [`commands`] for the verbs and [`session`] for the caching rules.

pub mod commands;
pub mod daemon;
pub mod dispatch;
pub mod session;
pub mod socket;

#[cfg(test)]
mod testing;

pub use daemon::Daemon;
pub use session::{ConfigLoader, FileConfigLoader, SessionManager};
pub use socket::{default_socket_path, ManualSocketProvider, SocketProvider};
