//! Core types and utilities for swift-agent.
//!
//! This crate provides the building blocks shared by the `swift-agentd`
//! daemon and the `swift-agent` command-line front end. The daemon holds
//! passwords, authenticators and cluster capabilities in memory; short-lived
//! tools talk to it over a line-oriented Unix socket protocol.
//!
//! # Modules
//!
//! - [`error`]: Error taxonomy (`AuthError`, `AgentError`)
//! - [`line`]: Newline framing for the socket transport
//! - [`protocol`]: Command verbs, response lines and error lines
//! - [`auth`]: The authenticator contract and its protocol variants
//! - [`config`]: TOML configuration loading and authenticator resolution
//! - [`cluster`]: Capability (`/info`) fetching and account checks
//! - [`client`]: Blocking protocol client and the unlock/retry helper
//! - [`export`]: Shell `export`/`unset` formatting
//!
//! # Example
//!
//! ```
//! use swift_agent_core::auth::Credentials;
//! use swift_agent_core::protocol;
//!
//! let creds = Credentials::new("https://cluster.example/v1/AUTH_x", "tok123", None);
//! let line = protocol::format_auth_response(&creds);
//! assert_eq!(line, "auth https://cluster.example/v1/AUTH_x tok123");
//! ```

pub mod auth;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod export;
pub mod line;
pub mod protocol;
pub mod url;

// Re-export commonly used types at the crate root for convenience
pub use auth::{AuthKind, AuthProvider, AuthResolver, Authenticator, Credentials};
pub use client::{AgentClient, PasswordPrompt, TerminalPrompt};
pub use cluster::{CapabilityDocument, CapabilityFetcher, HttpCapabilityFetcher};
pub use config::{AgentSettings, Config, ConfigError};
pub use error::{AgentError, AuthError, AuthErrorKind};
pub use line::LineBuffer;
pub use protocol::ProtocolError;
