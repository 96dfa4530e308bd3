//! Static credentials: a configured storage URL with an optional token.
//!
//! `noauth` is the same thing without a token. Neither variant ever expires
//! or talks to the network.

use serde::Deserialize;

use super::{AuthFuture, AuthProvider, Credentials};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenOptions {
    pub storage_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoAuthOptions {
    pub storage_url: String,
}

/// Serves configured credentials unchanged.
#[derive(Debug)]
pub struct StaticAuth {
    name: &'static str,
    storage_url: String,
    token: String,
}

impl StaticAuth {
    pub fn token(opts: TokenOptions) -> Self {
        Self {
            name: "token",
            storage_url: opts.storage_url,
            token: opts.auth_token.unwrap_or_default(),
        }
    }

    pub fn noauth(opts: NoAuthOptions) -> Self {
        Self {
            name: "noauth",
            storage_url: opts.storage_url,
            token: String::new(),
        }
    }
}

impl AuthProvider for StaticAuth {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fetch(&self) -> AuthFuture<'_> {
        let creds = Credentials::new(self.storage_url.clone(), self.token.clone(), None);
        Box::pin(async move { Ok(creds) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;

    #[tokio::test]
    async fn token_variant_returns_configured_pair() {
        let auth = StaticAuth::token(TokenOptions {
            storage_url: "https://cluster.example/v1/AUTH_x".into(),
            auth_token: Some("tok123".into()),
        });
        let creds = auth.fetch().await.unwrap();
        assert_eq!(creds.storage_url, "https://cluster.example/v1/AUTH_x");
        assert_eq!(creds.token, "tok123");
        assert_eq!(creds.expires, None);
    }

    #[tokio::test]
    async fn noauth_has_empty_token() {
        let mut auth = Authenticator::new(Box::new(StaticAuth::noauth(NoAuthOptions {
            storage_url: "http://saio:8080/v1/AUTH_test".into(),
        })));
        let creds = auth.get_credentials(false).await.unwrap();
        assert_eq!(creds.token, "");
        assert_eq!(auth.provider_name(), "noauth");
    }
}
