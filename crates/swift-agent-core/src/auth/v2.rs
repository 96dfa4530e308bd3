//! Keystone v2 password auth.

use std::time::SystemTime;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use super::catalog::{select_endpoint, EndpointFilter};
use super::http::{malformed, post_json, HttpSettings};
use super::{AuthFuture, AuthProvider, Credentials};
use crate::error::{AgentError, AuthError};

const ORIGIN: &str = module_path!();

#[derive(Debug, Clone, Deserialize)]
pub struct V2Options {
    pub auth_url: String,
    pub username: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl V2Options {
    /// Exactly one of `tenant_id` and `tenant_name` must be set.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.tenant_id, &self.tenant_name) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err("set only one of tenant_id and tenant_name".into()),
            (None, None) => Err("one of tenant_id or tenant_name is required".into()),
        }
    }

    fn filter(&self) -> EndpointFilter<'_> {
        EndpointFilter {
            service_name: self.service_name.as_deref(),
            region: self.region.as_deref(),
            interface: None,
        }
    }
}

pub struct V2Auth {
    opts: V2Options,
    password: SecretString,
    client: Client,
}

impl V2Auth {
    pub fn new(
        opts: V2Options,
        password: SecretString,
        http: &HttpSettings,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            opts,
            password,
            client: http.build_client()?,
        })
    }

    fn request_body(&self) -> Value {
        let mut auth = json!({
            "passwordCredentials": {
                "username": self.opts.username,
                "password": self.password.expose_secret(),
            }
        });
        if let Some(id) = &self.opts.tenant_id {
            auth["tenantId"] = json!(id);
        } else if let Some(name) = &self.opts.tenant_name {
            auth["tenantName"] = json!(name);
        }
        json!({ "auth": auth })
    }

    async fn login(&self) -> Result<Credentials, AgentError> {
        let (_, body) = post_json(&self.client, &self.opts.auth_url, &self.request_body(), ORIGIN)
            .await?;
        Ok(credentials_from_body(&body, &self.opts.filter())?)
    }
}

impl AuthProvider for V2Auth {
    fn name(&self) -> &'static str {
        "v2"
    }

    fn fetch(&self) -> AuthFuture<'_> {
        Box::pin(self.login())
    }
}

/// Extract credentials from a v2 token response.
pub fn credentials_from_body(
    body: &Value,
    filter: &EndpointFilter<'_>,
) -> Result<Credentials, AuthError> {
    let token = &body["access"]["token"];
    let id = token["id"]
        .as_str()
        .ok_or_else(|| malformed(ORIGIN, "missing access.token.id"))?;
    let expires = match token.get("expires").and_then(Value::as_str) {
        Some(raw) => {
            info!(expires = raw, "token expires");
            Some(parse_expiry(raw)?)
        }
        None => None,
    };
    let url = select_endpoint(&body["access"]["serviceCatalog"], filter, "publicURL")
        .map_err(|e| AuthError::failed(ORIGIN, e.to_string()))?;
    Ok(Credentials::new(url, id, expires))
}

pub(crate) fn parse_expiry(raw: &str) -> Result<SystemTime, AuthError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map(SystemTime::from)
        .map_err(|e| malformed(ORIGIN, format!("bad expiry {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn response() -> Value {
        json!({
            "access": {
                "token": {"id": "tok-v2", "expires": "2023-11-14T22:13:20Z"},
                "serviceCatalog": [
                    {"type": "object-store", "name": "swift", "endpoints": [
                        {"region": "RegionOne", "publicURL": "https://one/v1/AUTH_t"},
                        {"region": "RegionTwo", "publicURL": "https://two/v1/AUTH_t"}
                    ]}
                ]
            }
        })
    }

    #[test]
    fn parses_token_expiry_and_endpoint() {
        let creds = credentials_from_body(&response(), &EndpointFilter::default()).unwrap();
        assert_eq!(creds.token, "tok-v2");
        assert_eq!(creds.storage_url, "https://one/v1/AUTH_t");
        assert_eq!(
            creds.expires,
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn region_filter_selects_endpoint() {
        let filter = EndpointFilter {
            region: Some("RegionTwo"),
            ..Default::default()
        };
        let creds = credentials_from_body(&response(), &filter).unwrap();
        assert_eq!(creds.storage_url, "https://two/v1/AUTH_t");
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = credentials_from_body(&json!({"access": {}}), &EndpointFilter::default())
            .unwrap_err();
        assert!(err.to_string().contains("Error in response"));
    }

    #[test]
    fn tenant_options_are_exclusive() {
        let mut opts = V2Options {
            auth_url: "https://keystone/v2.0/tokens".into(),
            username: "alice".into(),
            tenant_id: None,
            tenant_name: None,
            service_name: None,
            region: None,
        };
        assert!(opts.validate().is_err());
        opts.tenant_name = Some("demo".into());
        assert!(opts.validate().is_ok());
        opts.tenant_id = Some("abc".into());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn request_body_uses_tenant_name() {
        let opts = V2Options {
            auth_url: "https://keystone/v2.0/tokens".into(),
            username: "alice".into(),
            tenant_id: None,
            tenant_name: Some("demo".into()),
            service_name: None,
            region: None,
        };
        let auth = V2Auth::new(opts, SecretString::from("pw"), &HttpSettings::default()).unwrap();
        let body = auth.request_body();
        assert_eq!(body["auth"]["tenantName"], "demo");
        assert_eq!(body["auth"]["passwordCredentials"]["password"], "pw");
        assert!(body["auth"].get("tenantId").is_none());
    }
}
