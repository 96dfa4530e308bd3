//! Talking to the storage cluster itself: capability discovery and account
//! checks.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::info;

use crate::auth::http::{build_client, check_status};
use crate::auth::Credentials;
use crate::config::Config;
use crate::error::AgentError;
use crate::url::scheme_host_only;

/// A cluster's `/info` response.
pub type CapabilityDocument = Map<String, Value>;

/// Field recording when a capability document was fetched.
pub const TIMESTAMP_KEY: &str = "timestamp";

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CapabilityDocument, AgentError>> + Send + 'a>>;

/// Retrieves capability documents.
pub trait CapabilityFetcher: Send + Sync {
    /// Fetch the document for the cluster serving `url`.
    ///
    /// Fails on a non-2xx status or a body that is not a JSON object.
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// Add a `timestamp` of the current time unless one is present.
pub fn stamp(doc: &mut CapabilityDocument, now: SystemTime) {
    if doc.contains_key(TIMESTAMP_KEY) {
        return;
    }
    let secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    doc.insert(TIMESTAMP_KEY.to_string(), Value::from(secs));
}

/// Fetches `<scheme>://<host>/info` over HTTP without credentials.
#[derive(Debug, Clone)]
pub struct HttpCapabilityFetcher {
    secure: Client,
    insecure: Client,
    insecure_servers: Vec<String>,
}

impl HttpCapabilityFetcher {
    pub fn new(timeout: Duration, insecure_servers: Vec<String>) -> Result<Self, AgentError> {
        Ok(Self {
            secure: build_client(timeout, false)?,
            insecure: build_client(timeout, true)?,
            insecure_servers,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AgentError> {
        let servers = config
            .insecure
            .servers
            .iter()
            .filter_map(|s| scheme_host_only(s).ok())
            .collect();
        Self::new(config.agent.request_timeout(), servers)
    }

    async fn get(&self, url: &str) -> Result<CapabilityDocument, AgentError> {
        let base = scheme_host_only(url)?;
        let client = if self.insecure_servers.contains(&base) {
            &self.insecure
        } else {
            &self.secure
        };
        let info_url = format!("{base}/info");
        info!(url = %info_url, "fetching capabilities");

        let response = client.get(&info_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Http(format!("{info_url} returned {status}")));
        }
        let body = response.text().await?;
        parse_document(&body)
    }
}

impl CapabilityFetcher for HttpCapabilityFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(self.get(url))
    }
}

/// Parse an `/info` body, which must be a JSON object.
pub fn parse_document(body: &str) -> Result<CapabilityDocument, AgentError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(_) => Err(AgentError::Http("capability response is not a JSON object".into())),
        Err(e) => Err(AgentError::Http(format!("invalid capability response: {e}"))),
    }
}

/// `HEAD` the account behind `creds` to check that the token still works.
///
/// Returns `Unauthorized` on 401 and `Forbidden` on 403.
pub async fn head_account(
    creds: &Credentials,
    timeout: Duration,
    accept_invalid_certs: bool,
) -> Result<(), AgentError> {
    let client = build_client(timeout, accept_invalid_certs)?;
    let mut request = client.head(&creds.storage_url);
    if !creds.token.is_empty() {
        request = request.header("X-Auth-Token", &creds.token);
    }
    let response = request.send().await?;
    check_status(response.status(), module_path!())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_adds_timestamp_once() {
        let mut doc = parse_document(r#"{"swift": {}}"#).unwrap();
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_250);
        stamp(&mut doc, now);
        assert_eq!(doc[TIMESTAMP_KEY].as_f64(), Some(1_700_000_000.25));

        stamp(&mut doc, SystemTime::now());
        assert_eq!(doc[TIMESTAMP_KEY].as_f64(), Some(1_700_000_000.25));
    }

    #[test]
    fn upstream_timestamp_is_kept() {
        let mut doc = parse_document(r#"{"swift": {}, "timestamp": 12}"#).unwrap();
        stamp(&mut doc, SystemTime::now());
        assert_eq!(doc[TIMESTAMP_KEY], Value::from(12));
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        assert!(matches!(parse_document("[]"), Err(AgentError::Http(_))));
        assert!(matches!(parse_document("<html>"), Err(AgentError::Http(_))));
    }

    #[test]
    fn fetcher_builds_from_config() {
        let config = Config::from_toml_str(
            r#"
[insecure]
servers = ["https://saio:8080/v1", "not a url"]
"#,
        )
        .unwrap();
        let fetcher = HttpCapabilityFetcher::from_config(&config).unwrap();
        assert_eq!(fetcher.insecure_servers, vec!["https://saio:8080"]);
    }
}
