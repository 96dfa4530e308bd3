//! Legacy v1 auth: credentials go out in request headers and come back in
//! response headers.

use std::time::{Duration, SystemTime};

use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use super::http::{check_status, header_str, HttpSettings};
use super::{AuthFuture, AuthProvider, Credentials};
use crate::error::{AgentError, AuthError};

const ORIGIN: &str = module_path!();

const STORAGE_URL: &str = "X-Storage-Url";
const AUTH_TOKEN: &str = "X-Auth-Token";
const TOKEN_EXPIRES: &str = "X-Auth-Token-Expires";

#[derive(Debug, Clone, Deserialize)]
pub struct V1Options {
    pub auth_url: String,
    pub username: String,
}

pub struct V1Auth {
    opts: V1Options,
    password: SecretString,
    client: Client,
}

impl V1Auth {
    pub fn new(
        opts: V1Options,
        password: SecretString,
        http: &HttpSettings,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            opts,
            password,
            client: http.build_client()?,
        })
    }

    async fn login(&self) -> Result<Credentials, AgentError> {
        let response = self
            .client
            .get(&self.opts.auth_url)
            .header("X-Auth-User", &self.opts.username)
            .header("X-Auth-Key", self.password.expose_secret())
            .send()
            .await?;
        check_status(response.status(), ORIGIN)?;
        Ok(credentials_from_headers(response.headers(), SystemTime::now())?)
    }
}

impl AuthProvider for V1Auth {
    fn name(&self) -> &'static str {
        "v1"
    }

    fn fetch(&self) -> AuthFuture<'_> {
        Box::pin(self.login())
    }
}

/// Extract credentials from a successful v1 response.
///
/// `X-Auth-Token-Expires` is a number of seconds from `now`.
pub fn credentials_from_headers(
    headers: &HeaderMap,
    now: SystemTime,
) -> Result<Credentials, AuthError> {
    let missing: Vec<&str> = [AUTH_TOKEN, STORAGE_URL]
        .into_iter()
        .filter(|h| header_str(headers, h).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(AuthError::failed(
            ORIGIN,
            format!("Missing header(s): {}", missing.join(", ")),
        ));
    }

    let expires = match header_str(headers, TOKEN_EXPIRES) {
        Some(raw) => {
            info!(expires_in = raw, "token expires");
            match raw.trim().parse::<u64>() {
                Ok(secs) => Some(now.checked_add(Duration::from_secs(secs)).ok_or_else(|| {
                    AuthError::failed(ORIGIN, format!("bad expiry in {TOKEN_EXPIRES}: {raw}"))
                })?),
                Err(_) => None,
            }
        }
        None => None,
    };

    Ok(Credentials::new(
        header_str(headers, STORAGE_URL).unwrap_or_default(),
        header_str(headers, AUTH_TOKEN).unwrap_or_default(),
        expires,
    ))
}
