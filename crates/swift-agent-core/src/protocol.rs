//! Line protocol spoken between swift-agent clients and the daemon.
//!
//! Each request is `<verb> <argument>` on one line and each response is one
//! line. Responses that start with `ERROR ` carry a failure; the three
//! distinguished auth kinds render as `Kind(origin)` so the client can raise
//! the matching typed error.
//!
//! | verb     | argument                  | success                          |
//! |----------|---------------------------|----------------------------------|
//! | `reload` |                           | `reloaded`                       |
//! | `unlock` | `<auth_id> <password>`    | `unlocked`                       |
//! | `purge`  | `<auth_id or url>`        | `purged`                         |
//! | `auth`   | `<auth_id>`               | `auth <url> <token>[ <expires>]` |
//! | `reauth` | `<auth_id>`               | `auth <url> <token>[ <expires>]` |
//! | `info`   | `<url>`                   | single-line JSON                 |
//! | `reinfo` | `<url>`                   | single-line JSON                 |

use std::borrow::Cow;
use std::fmt::Display;

use thiserror::Error;

use crate::auth::Credentials;
use crate::error::{AgentError, AuthError};

/// Command verbs understood by the daemon.
pub mod verb {
    pub const RELOAD: &str = "reload";
    pub const UNLOCK: &str = "unlock";
    pub const PURGE: &str = "purge";
    pub const AUTH: &str = "auth";
    pub const REAUTH: &str = "reauth";
    pub const INFO: &str = "info";
    pub const REINFO: &str = "reinfo";
}

pub const ERROR_PREFIX: &str = "ERROR ";
pub const AUTH_PREFIX: &str = "auth ";

pub const RELOADED: &str = "reloaded";
pub const UNLOCKED: &str = "unlocked";
pub const PURGED: &str = "purged";

/// Errors raised while framing or interpreting protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to read/write the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line was not valid UTF-8.
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    /// A payload would have spanned more than one line.
    #[error("payload contains an embedded newline")]
    EmbeddedNewline,

    /// A line exceeded the size limit.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The peer closed the connection before responding.
    #[error("connection closed")]
    ConnectionClosed,

    /// A response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A capability response was not a JSON object.
    #[error("invalid JSON response: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Split a request line into its verb and the remaining argument string.
pub fn split_command(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

/// Render a failure as an `ERROR` line.
///
/// Newlines in the description are flattened so the reply stays one line.
pub fn error_line(err: &dyn Display) -> String {
    let text = err.to_string().replace(['\r', '\n'], " ");
    format!("{ERROR_PREFIX}{text}")
}

/// The reply for a verb with no registered handler.
pub fn unknown_command(verb: &str) -> String {
    format!("{ERROR_PREFIX}unknown command {verb}")
}

/// Render credentials as an `auth` response line.
///
/// The expiration is appended as a third field, in Unix seconds, only when
/// one is known. This extends the two-field `auth <url> <token>` form, so
/// clients must treat the field as optional; [`parse_auth_response`]
/// accepts both.
pub fn format_auth_response(creds: &Credentials) -> String {
    match creds.expires_unix() {
        Some(expires) => format!(
            "{AUTH_PREFIX}{} {} {}",
            creds.storage_url, creds.token, expires
        ),
        None => format!("{AUTH_PREFIX}{} {}", creds.storage_url, creds.token),
    }
}

/// Parse an `auth` response line back into credentials.
pub fn parse_auth_response(line: &str) -> Result<Credentials, AgentError> {
    let rest = line
        .strip_prefix(AUTH_PREFIX)
        .ok_or_else(|| ProtocolError::UnexpectedResponse(line.to_string()))?;
    let mut parts = rest.splitn(3, ' ');
    let storage_url = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    let expires = match parts.next() {
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| ProtocolError::UnexpectedResponse(line.to_string()))?,
        ),
        None => None,
    };
    if storage_url.is_empty() {
        return Err(ProtocolError::UnexpectedResponse(line.to_string()).into());
    }
    Credentials::from_unix(storage_url, token, expires)
        .ok_or_else(|| ProtocolError::UnexpectedResponse(line.to_string()).into())
}

/// Turn an `ERROR` response into the matching error; pass others through.
pub fn check_response(line: &str) -> Result<&str, AgentError> {
    let Some(text) = line.strip_prefix(ERROR_PREFIX) else {
        return Ok(line);
    };
    match AuthError::parse(text) {
        Some(err) => Err(err.into()),
        None => Err(AgentError::Daemon(text.to_string())),
    }
}

/// A copy of a request line that is safe to log.
///
/// `unlock` carries a password, so everything after the auth id is masked.
pub fn redact(line: &str) -> Cow<'_, str> {
    match split_command(line) {
        (verb::UNLOCK, rest) => {
            let (auth_id, _) = split_command(rest);
            Cow::Owned(format!("{} {auth_id} ********", verb::UNLOCK))
        }
        _ => Cow::Borrowed(line),
    }
}
