//! Error taxonomy shared by the daemon, the client and the authenticators.
//!
//! Three authentication failures are distinguished because callers react to
//! them differently:
//!
//! - `Unauthorized`: re-authenticating may help
//! - `Forbidden`: re-authenticating will not help
//! - `PasswordRequired`: a password must be supplied first
//!
//! Everything else is opaque. On the wire an `AuthError` renders as
//! `Kind(origin)` or `Kind(origin, message)`, which is what [`AuthError::parse`]
//! reads back on the client side.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::ProtocolError;

/// Kind of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Credentials were rejected; a fresh login may succeed.
    Unauthorized,
    /// Access is denied and a fresh login will not change that.
    Forbidden,
    /// The authenticator needs a password that has not been supplied.
    PasswordRequired,
    /// Any other authentication failure.
    Failed,
}

impl AuthErrorKind {
    /// Kinds that are recognised by name on the wire.
    pub const DISTINGUISHED: [AuthErrorKind; 3] = [
        AuthErrorKind::Unauthorized,
        AuthErrorKind::Forbidden,
        AuthErrorKind::PasswordRequired,
    ];

    /// The name used in error lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::Unauthorized => "Unauthorized",
            AuthErrorKind::Forbidden => "Forbidden",
            AuthErrorKind::PasswordRequired => "PasswordRequired",
            AuthErrorKind::Failed => "AuthError",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authentication failure.
///
/// `origin` names the component that raised it (an authenticator module, the
/// configuration, or the agent client).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct AuthError {
    kind: AuthErrorKind,
    origin: String,
    message: Option<String>,
}

impl AuthError {
    /// Create an error of the given kind.
    pub fn new(kind: AuthErrorKind, origin: impl Into<String>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: None,
        }
    }

    /// Credentials were rejected.
    pub fn unauthorized(origin: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unauthorized, origin)
    }

    /// Access is denied.
    pub fn forbidden(origin: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Forbidden, origin)
    }

    /// A password is needed but was not supplied.
    pub fn password_required(origin: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::PasswordRequired, origin)
    }

    /// Generic authentication failure with a message.
    pub fn failed(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Failed, origin).with_message(message)
    }

    /// Map a non-2xx HTTP status to an error.
    pub fn from_status(status: u16, origin: impl Into<String>) -> Self {
        match status {
            401 => Self::unauthorized(origin),
            403 => Self::forbidden(origin),
            other => Self::failed(origin, other.to_string()),
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// `Kind(origin)` or `Kind(origin, message)`, as sent on the wire.
    fn render(&self) -> String {
        match &self.message {
            Some(message) => format!("{}({}, {})", self.kind, self.origin, message),
            None => format!("{}({})", self.kind, self.origin),
        }
    }

    /// Parse the text of an error line (without the `ERROR ` prefix).
    ///
    /// Only the three distinguished kinds are recognised; anything else
    /// returns `None` and should be surfaced as an opaque daemon error.
    pub fn parse(text: &str) -> Option<Self> {
        AuthErrorKind::DISTINGUISHED.iter().find_map(|kind| {
            let detail = text.strip_prefix(kind.as_str())?.strip_prefix('(')?;
            let detail = detail.strip_suffix(')').unwrap_or(detail);
            let error = match detail.split_once(", ") {
                Some((origin, message)) => Self::new(*kind, origin).with_message(message),
                None => Self::new(*kind, detail),
            };
            Some(error)
        })
    }
}


/// Umbrella error for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An authentication failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Framing or response-format failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Opaque error reported by the daemon.
    #[error("swift-agent error: {0}")]
    Daemon(String),

    /// HTTP request to a cluster failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A URL was not absolute or could not be parsed.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A command argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Socket or terminal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// The authentication kind, if this is an authentication failure.
    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            AgentError::Auth(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.auth_kind() == Some(AuthErrorKind::Unauthorized)
    }

    pub fn is_password_required(&self) -> bool {
        self.auth_kind() == Some(AuthErrorKind::PasswordRequired)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Http(err.to_string())
    }
}
