//! The authenticator contract.
//!
//! Every auth protocol variant implements [`AuthProvider`], which performs one
//! fresh login. [`Authenticator`] wraps a provider and owns the freshness
//! state machine: it remembers the most recent successful
//! [`Credentials`] and only goes back to the provider when those are missing,
//! carry an empty token, or have expired.
//!
//! Variants are selected by the `use` key of an `[auth.<name>]` table, see
//! [`AuthKind`].

pub mod agent;
pub mod catalog;
pub mod http;
pub mod token;
pub mod v1;
pub mod v2;
pub mod v3;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

use crate::error::AgentError;

/// A storage URL, a token, and an optional expiration.
///
/// No expiration means the token never expires.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub storage_url: String,
    pub token: String,
    pub expires: Option<SystemTime>,
}

impl Credentials {
    pub fn new(
        storage_url: impl Into<String>,
        token: impl Into<String>,
        expires: Option<SystemTime>,
    ) -> Self {
        Self {
            storage_url: storage_url.into(),
            token: token.into(),
            expires,
        }
    }

    /// Build credentials from an expiration given in Unix seconds.
    ///
    /// Returns `None` when the expiration is not a representable time.
    pub fn from_unix(
        storage_url: impl Into<String>,
        token: impl Into<String>,
        expires: Option<f64>,
    ) -> Option<Self> {
        let expires = match expires {
            Some(secs) => Some(unix_time(secs)?),
            None => None,
        };
        Some(Self::new(storage_url, token, expires))
    }

    /// The expiration as Unix seconds.
    pub fn expires_unix(&self) -> Option<f64> {
        self.expires.map(|at| match at.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(_) => 0.0,
        })
    }

    /// Whether these credentials must be refreshed before use.
    pub fn is_stale(&self, now: SystemTime) -> bool {
        if self.token.is_empty() {
            return true;
        }
        match self.expires {
            Some(at) => at < now,
            None => false,
        }
    }
}

/// `secs` after the Unix epoch; negative values clamp to the epoch.
fn unix_time(secs: f64) -> Option<SystemTime> {
    let offset = Duration::try_from_secs_f64(secs.max(0.0)).ok()?;
    UNIX_EPOCH.checked_add(offset)
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("storage_url", &self.storage_url)
            .field("token", &"[REDACTED]")
            .field("expires", &self.expires)
            .finish()
    }
}

/// Boxed future returned by [`AuthProvider::fetch`].
pub type AuthFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Credentials, AgentError>> + Send + 'a>>;

/// One auth protocol variant.
pub trait AuthProvider: Send + Sync {
    /// Short name of the variant, for logging.
    fn name(&self) -> &'static str;

    /// Perform a fresh login.
    fn fetch(&self) -> AuthFuture<'_>;

    /// Whether obtaining credentials ever required an interactive prompt.
    fn ever_prompted(&self) -> bool {
        false
    }
}

/// Caches the credentials produced by a provider.
pub struct Authenticator {
    provider: Box<dyn AuthProvider>,
    current: Option<Credentials>,
}

impl Authenticator {
    pub fn new(provider: Box<dyn AuthProvider>) -> Self {
        Self {
            provider,
            current: None,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// The last successful credentials, if any.
    pub fn current(&self) -> Option<&Credentials> {
        self.current.as_ref()
    }

    pub fn ever_prompted(&self) -> bool {
        self.provider.ever_prompted()
    }

    /// Whether the next [`get_credentials`](Self::get_credentials) will log in.
    pub fn needs_refresh(&self) -> bool {
        match &self.current {
            Some(creds) => creds.is_stale(SystemTime::now()),
            None => true,
        }
    }

    /// Return cached credentials, refreshing them when stale or forced.
    ///
    /// The cached credentials are replaced only when the refresh succeeds.
    pub async fn get_credentials(&mut self, force: bool) -> Result<Credentials, AgentError> {
        if let Some(creds) = self.current.as_ref().filter(|_| !force && !self.needs_refresh()) {
            return Ok(creds.clone());
        }
        debug!(provider = self.provider.name(), force, "refreshing credentials");
        let fresh = self.provider.fetch().await?;
        self.current = Some(fresh.clone());
        Ok(fresh)
    }

    /// Force a fresh login and store the result.
    pub async fn reauth(&mut self) -> Result<Credentials, AgentError> {
        self.get_credentials(true).await
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("provider", &self.provider.name())
            .field("current", &self.current)
            .finish()
    }
}

/// The auth protocol selected by the `use` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// Fixed storage URL and optional token.
    Token,
    /// Fixed storage URL, no token.
    NoAuth,
    /// Legacy header-based auth.
    V1,
    /// Keystone v2.
    V2,
    /// Keystone v3.
    #[default]
    V3,
    /// Delegate to a running daemon.
    Agent,
}

impl AuthKind {
    /// Whether the variant needs a password to log in.
    pub fn requires_password(&self) -> bool {
        matches!(self, AuthKind::V1 | AuthKind::V2 | AuthKind::V3)
    }
}

/// Builds authenticators for configured auth identifiers.
pub trait AuthResolver: Send + Sync {
    /// Construct a new authenticator for `auth_id`.
    ///
    /// Construction performs no network I/O. Variants that need a password
    /// fail with `PasswordRequired` when none is available.
    fn resolve(
        &self,
        auth_id: &str,
        password: Option<&SecretString>,
    ) -> Result<Authenticator, AgentError>;
}
