//! Configuration types and loading for swift-agent.
//!
//! Configuration is TOML. Files are read from lowest to highest priority and
//! merged table by table, so a later file only needs the keys it overrides:
//!
//! 1. `/etc/swift-agent/config.toml`
//! 2. `~/.config/swift-agent/config.toml` (via `dirs::config_dir()`)
//! 3. `./swift-agent.toml`
//! 4. `$SWIFT_AGENT_CONF`
//!
//! # Error Handling
//!
//! - Missing files are skipped; with no files at all the defaults apply.
//! - A file that exists but cannot be read or parsed is an error (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! default_auth = "prod"
//!
//! [agent]
//! backlog = 1
//! idle_timeout_ms = 1000
//! request_timeout_secs = 10
//!
//! [insecure]
//! servers = ["https://saio:8080"]   # skip TLS verification for these
//! auth = ["saio"]                   # may use a password from this file
//!
//! [auth.prod]
//! use = "v3"
//! auth_url = "https://keystone.example/v3/auth/tokens"
//! username = "alice"
//! domain_name = "Default"
//!
//! [auth.saio]
//! use = "v1"
//! auth_url = "https://saio:8080/auth/v1.0"
//! username = "test:tester"
//! password = "testing"
//! verify = false
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::agent::{AgentAuth, AgentOptions};
use crate::auth::http::HttpSettings;
use crate::auth::token::{NoAuthOptions, StaticAuth, TokenOptions};
use crate::auth::v1::{V1Auth, V1Options};
use crate::auth::v2::{V2Auth, V2Options};
use crate::auth::v3::{V3Auth, V3Options};
use crate::auth::{AuthKind, AuthProvider, AuthResolver, Authenticator};
use crate::client::TerminalPrompt;
use crate::error::{AgentError, AuthError};
use crate::url::{is_absolute_url, scheme_host_only};

/// Environment variable naming an extra, highest-priority config file.
pub const CONFIG_ENV_VAR: &str = "SWIFT_AGENT_CONF";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The merged configuration has the wrong shape.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),

    /// No `[auth.<name>]` table with this name.
    #[error("Unknown auth config {0:?}")]
    UnknownAuth(String),

    /// An auth table is missing options or has bad values.
    #[error("Invalid options for auth {auth:?}: {message}")]
    Options { auth: String, message: String },

    /// The daemon cannot delegate to itself.
    #[error("Auth {0:?} uses the agent variant, which the daemon cannot serve")]
    AgentNotAllowed(String),
}

/// Main configuration struct.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Auth used when none is named.
    pub default_auth: Option<String>,
    /// Daemon settings.
    pub agent: AgentSettings,
    /// Hosts and auths with relaxed security.
    pub insecure: InsecureConfig,
    /// Auth tables by name.
    pub auth: BTreeMap<String, AuthSection>,
    #[serde(skip)]
    forbid_agent: bool,
}

/// Daemon listener and timeout settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Listen backlog (default: 1).
    pub backlog: u32,
    /// Per-connection idle read timeout in milliseconds (default: 1000).
    pub idle_timeout_ms: u64,
    /// Outbound HTTP request timeout in seconds (default: 10).
    pub request_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backlog: 1,
            idle_timeout_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

impl AgentSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InsecureConfig {
    /// Cluster or auth URLs whose TLS certificates are not verified.
    pub servers: Vec<String>,
    /// Auths allowed to take their password from the config file.
    pub auth: Vec<String>,
}

/// One `[auth.<name>]` table.
#[derive(Debug, Deserialize)]
pub struct AuthSection {
    /// Protocol variant (`use` key, default v3).
    #[serde(rename = "use", default)]
    pub kind: AuthKind,
    /// Default for token verification after `swift-agent auth`.
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Only honoured for auths listed in `insecure.auth`.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    /// Variant-specific options.
    #[serde(flatten)]
    pub options: toml::Table,
}

fn default_true() -> bool {
    true
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl AuthSection {
    fn options_as<T: DeserializeOwned>(&self, auth: &str) -> Result<T, ConfigError> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| options_error(auth, e.message()))
    }

    fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(toml::Value::as_str)
    }
}

fn options_error(auth: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Options {
        auth: auth.to_string(),
        message: message.into(),
    }
}

fn require_url(auth: &str, key: &str, value: &str) -> Result<(), ConfigError> {
    if is_absolute_url(value) {
        Ok(())
    } else {
        Err(options_error(auth, format!("{key} must be an absolute URL, got {value:?}")))
    }
}

impl Config {
    /// Config files in priority order, lowest first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/swift-agent/config.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("swift-agent").join("config.toml"));
        }
        paths.push(PathBuf::from("swift-agent.toml"));
        if let Some(extra) = std::env::var_os(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(extra));
        }
        paths
    }

    /// Load and merge every config file that exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layered(&Self::search_paths())
    }

    /// Load configuration from a specific path.
    ///
    /// Unlike [`load`](Self::load), the file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let table = read_table(path)?;
        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Merge the given files, skipping those that do not exist.
    pub fn load_layered(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        let mut read = Vec::new();
        for path in paths.iter().filter(|p| p.exists()) {
            merge_tables(&mut merged, read_table(path)?);
            read.push(path.display().to_string());
        }
        info!(files = ?read, "read configuration");
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Refuse the `agent` variant, as the daemon must do.
    pub fn forbid_agent(mut self) -> Self {
        self.forbid_agent = true;
        self
    }

    /// The configured default, or the only auth when exactly one exists.
    pub fn default_auth(&self) -> Option<&str> {
        match &self.default_auth {
            Some(name) => Some(name),
            None if self.auth.len() == 1 => self.auth.keys().next().map(String::as_str),
            None => None,
        }
    }

    /// Configured auth names and their auth URLs.
    pub fn available_auths(&self) -> BTreeMap<&str, Option<&str>> {
        self.auth
            .iter()
            .map(|(name, section)| (name.as_str(), section.option_str("auth_url")))
            .collect()
    }

    /// Whether `swift-agent auth` should verify tokens for this auth by
    /// default.
    pub fn default_verify(&self, auth_name: &str) -> bool {
        self.auth.get(auth_name).map_or(true, |s| s.verify)
    }

    /// Whether TLS verification is disabled for the host serving `url`.
    pub fn is_insecure(&self, url: &str) -> bool {
        let Ok(target) = scheme_host_only(url) else {
            return false;
        };
        self.insecure
            .servers
            .iter()
            .filter_map(|s| scheme_host_only(s).ok())
            .any(|s| s == target)
    }

    fn http_for(&self, url: &str) -> HttpSettings {
        HttpSettings {
            timeout: self.agent.request_timeout(),
            accept_invalid_certs: self.is_insecure(url),
        }
    }

    /// Pick the password to log in with.
    fn password_for(
        &self,
        auth_name: &str,
        section: &AuthSection,
        supplied: Option<&SecretString>,
    ) -> Result<SecretString, AgentError> {
        if let Some(password) = supplied {
            if section.password.is_some() {
                warn!(auth_id = %auth_name, "ignoring password from config");
            }
            return Ok(SecretString::from(password.expose_secret().to_owned()));
        }
        match &section.password {
            Some(password) if self.insecure.auth.iter().any(|a| a == auth_name) => {
                Ok(SecretString::from(password.expose_secret().to_owned()))
            }
            Some(_) => {
                warn!(auth_id = %auth_name, "ignoring password from config");
                Err(AuthError::password_required(module_path!()).into())
            }
            None => Err(AuthError::password_required(module_path!()).into()),
        }
    }

    /// Build an authenticator for `auth_name`.
    pub fn resolve(
        &self,
        auth_name: &str,
        password: Option<&SecretString>,
    ) -> Result<Authenticator, AgentError> {
        let section = self
            .auth
            .get(auth_name)
            .ok_or_else(|| ConfigError::UnknownAuth(auth_name.to_string()))?;
        debug!(auth_id = %auth_name, kind = ?section.kind, "building authenticator");

        let provider: Box<dyn AuthProvider> = match section.kind {
            AuthKind::Token => {
                let opts: TokenOptions = section.options_as(auth_name)?;
                require_url(auth_name, "storage_url", &opts.storage_url)?;
                Box::new(StaticAuth::token(opts))
            }
            AuthKind::NoAuth => {
                let opts: NoAuthOptions = section.options_as(auth_name)?;
                require_url(auth_name, "storage_url", &opts.storage_url)?;
                Box::new(StaticAuth::noauth(opts))
            }
            AuthKind::V1 => {
                let opts: V1Options = section.options_as(auth_name)?;
                require_url(auth_name, "auth_url", &opts.auth_url)?;
                let password = self.password_for(auth_name, section, password)?;
                let http = self.http_for(&opts.auth_url);
                Box::new(V1Auth::new(opts, password, &http)?)
            }
            AuthKind::V2 => {
                let opts: V2Options = section.options_as(auth_name)?;
                require_url(auth_name, "auth_url", &opts.auth_url)?;
                opts.validate().map_err(|m| options_error(auth_name, m))?;
                let password = self.password_for(auth_name, section, password)?;
                let http = self.http_for(&opts.auth_url);
                Box::new(V2Auth::new(opts, password, &http)?)
            }
            AuthKind::V3 => {
                let opts: V3Options = section.options_as(auth_name)?;
                require_url(auth_name, "auth_url", &opts.auth_url)?;
                opts.validate().map_err(|m| options_error(auth_name, m))?;
                let password = self.password_for(auth_name, section, password)?;
                let http = self.http_for(&opts.auth_url);
                Box::new(V3Auth::new(opts, password, &http)?)
            }
            AuthKind::Agent => {
                if self.forbid_agent {
                    return Err(ConfigError::AgentNotAllowed(auth_name.to_string()).into());
                }
                let opts: AgentOptions = section.options_as(auth_name)?;
                Box::new(AgentAuth::new(auth_name, opts, Arc::new(TerminalPrompt))?)
            }
        };
        Ok(Authenticator::new(provider))
    }
}

impl AuthResolver for Config {
    fn resolve(
        &self,
        auth_id: &str,
        password: Option<&SecretString>,
    ) -> Result<Authenticator, AgentError> {
        Config::resolve(self, auth_id, password)
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge `overlay` into `base`; nested tables merge, other values replace.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
