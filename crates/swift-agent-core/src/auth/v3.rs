//! Keystone v3 password auth.
//!
//! The token comes back in the `X-Subject-Token` header; the body carries the
//! expiry and the service catalog.

use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::catalog::{select_endpoint, EndpointFilter};
use super::http::{header_str, malformed, post_json, HttpSettings};
use super::v2::parse_expiry;
use super::{AuthFuture, AuthProvider, Credentials};
use crate::error::{AgentError, AuthError};

const ORIGIN: &str = module_path!();

const SUBJECT_TOKEN: &str = "X-Subject-Token";

#[derive(Debug, Clone, Deserialize)]
pub struct V3Options {
    pub auth_url: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
}

impl V3Options {
    /// Either `user_id`, or `username` with exactly one of `domain_id` and
    /// `domain_name`.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.user_id, &self.username) {
            (Some(_), None) => Ok(()),
            (Some(_), Some(_)) => Err("set only one of user_id and username".into()),
            (None, None) => Err("one of user_id or username is required".into()),
            (None, Some(_)) => match (&self.domain_id, &self.domain_name) {
                (Some(_), None) | (None, Some(_)) => Ok(()),
                (Some(_), Some(_)) => Err("set only one of domain_id and domain_name".into()),
                (None, None) => Err("username requires domain_id or domain_name".into()),
            },
        }
    }

    fn filter(&self) -> EndpointFilter<'_> {
        EndpointFilter {
            service_name: self.service_name.as_deref(),
            region: self.region.as_deref(),
            interface: self.interface.as_deref(),
        }
    }
}

pub struct V3Auth {
    opts: V3Options,
    password: SecretString,
    client: Client,
}

impl V3Auth {
    pub fn new(
        opts: V3Options,
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
        let mut user = json!({ "password": self.password.expose_secret() });
        if let Some(id) = &self.opts.user_id {
            user["id"] = json!(id);
        } else {
            user["name"] = json!(self.opts.username);
            user["domain"] = match (&self.opts.domain_id, &self.opts.domain_name) {
                (Some(id), _) => json!({ "id": id }),
                (None, name) => json!({ "name": name }),
            };
        }
        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": { "user": user }
                }
            }
        })
    }

    async fn login(&self) -> Result<Credentials, AgentError> {
        let (headers, body) =
            post_json(&self.client, &self.opts.auth_url, &self.request_body(), ORIGIN).await?;
        Ok(credentials_from_response(&headers, &body, &self.opts.filter())?)
    }
}

impl AuthProvider for V3Auth {
    fn name(&self) -> &'static str {
        "v3"
    }

    fn fetch(&self) -> AuthFuture<'_> {
        Box::pin(self.login())
    }
}

/// Extract credentials from a v3 token response.
pub fn credentials_from_response(
    headers: &HeaderMap,
    body: &Value,
    filter: &EndpointFilter<'_>,
) -> Result<Credentials, AuthError> {
    let token = header_str(headers, SUBJECT_TOKEN)
        .ok_or_else(|| malformed(ORIGIN, format!("missing {SUBJECT_TOKEN} header")))?;
    let expires = match body["token"].get("expires_at").and_then(Value::as_str) {
        Some(raw) => {
            info!(expires = raw, "token expires");
            Some(parse_expiry(raw)?)
        }
        None => None,
    };
    let url = select_endpoint(&body["token"]["catalog"], filter, "url")
        .map_err(|e| AuthError::failed(ORIGIN, e.to_string()))?;
    Ok(Credentials::new(url, token, expires))
}
