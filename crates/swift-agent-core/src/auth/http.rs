//! HTTP plumbing shared by the network auth variants.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{AgentError, AuthError};

/// Default bound on a single outbound request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport settings for one authenticator.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Skip TLS certificate verification (hosts listed as insecure).
    pub accept_invalid_certs: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

impl HttpSettings {
    pub fn build_client(&self) -> Result<Client, AgentError> {
        build_client(self.timeout, self.accept_invalid_certs)
    }
}

/// Build a client with the given timeout and certificate policy.
pub fn build_client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client, AgentError> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .user_agent(concat!("swift-agent/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Map a non-2xx status to an auth error.
pub fn check_status(status: StatusCode, origin: &str) -> Result<(), AuthError> {
    if status.is_success() {
        return Ok(());
    }
    Err(AuthError::from_status(status.as_u16(), origin))
}

/// The auth error for a response body that lacks an expected field.
pub fn malformed(origin: &str, detail: impl std::fmt::Display) -> AuthError {
    AuthError::failed(origin, format!("Error in response: {detail}"))
}

/// POST a JSON body and return the response headers and parsed JSON body.
pub async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    origin: &str,
) -> Result<(HeaderMap, Value), AgentError> {
    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(body)
        .send()
        .await?;
    check_status(response.status(), origin)?;

    let headers = response.headers().clone();
    let data = response
        .json::<Value>()
        .await
        .map_err(|e| AuthError::failed(origin, format!("Error parsing response: {e}")))?;
    Ok((headers, data))
}

/// Read a header as UTF-8 text.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK, "x").is_ok());
        assert!(check_status(StatusCode::NO_CONTENT, "x").is_ok());
        assert_eq!(
            check_status(StatusCode::UNAUTHORIZED, "x").unwrap_err().kind(),
            AuthErrorKind::Unauthorized
        );
        assert_eq!(
            check_status(StatusCode::FORBIDDEN, "x").unwrap_err().kind(),
            AuthErrorKind::Forbidden
        );
        let err = check_status(StatusCode::SERVICE_UNAVAILABLE, "x").unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::Failed);
        assert_eq!(err.message(), Some("503"));
    }

    #[test]
    fn malformed_message() {
        let err = malformed("v2", "missing access.token.id");
        assert_eq!(err.to_string(), "AuthError(v2, Error in response: missing access.token.id)");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-subject-token", HeaderValue::from_static("abc"));
        assert_eq!(header_str(&headers, "X-Subject-Token"), Some("abc"));
        assert_eq!(header_str(&headers, "X-Auth-Token"), None);
    }

    #[test]
    fn client_builds_for_both_policies() {
        assert!(HttpSettings::default().build_client().is_ok());
        assert!(build_client(Duration::from_secs(1), true).is_ok());
    }
}
