//! Credential cache and session manager.
//!
//! All cached state lives in one [`SessionState`] behind one async mutex:
//!
//! - passwords handed over with `unlock`, by auth id
//! - authenticators, built lazily by the configuration resolver
//! - capability documents, by `scheme://host`
//!
//! Every operation takes the lock once, so a command is applied completely
//! or not at all and connections never observe each other's partial updates.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::SystemTime;

use secrecy::SecretString;
use swift_agent_core::cluster::stamp;
use swift_agent_core::url::{is_absolute_url, scheme_host_only};
use swift_agent_core::{
    AgentError, AgentSettings, AuthResolver, Authenticator, CapabilityDocument,
    CapabilityFetcher, Config, Credentials, HttpCapabilityFetcher,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Everything derived from one read of the configuration.
pub struct Snapshot {
    pub resolver: Box<dyn AuthResolver>,
    pub fetcher: Box<dyn CapabilityFetcher>,
    pub settings: AgentSettings,
}

/// Produces a fresh [`Snapshot`] at startup and on every `reload`.
pub trait ConfigLoader: Send + Sync {
    fn load(&self) -> Result<Snapshot, AgentError>;
}

/// Loads TOML configuration from disk.
#[derive(Debug, Default, Clone)]
pub struct FileConfigLoader {
    path: Option<PathBuf>,
}

impl FileConfigLoader {
    /// Read from `path` only, or from the standard search path when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> Result<Snapshot, AgentError> {
        let config = match &self.path {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        }
        .forbid_agent();
        let fetcher = HttpCapabilityFetcher::from_config(&config)?;
        let settings = config.agent.clone();
        Ok(Snapshot {
            resolver: Box::new(config),
            fetcher: Box::new(fetcher),
            settings,
        })
    }
}

/// The three caches plus the configuration they were built from.
pub struct SessionState {
    snapshot: Snapshot,
    passwords: HashMap<String, SecretString>,
    authenticators: HashMap<String, Authenticator>,
    info: HashMap<String, CapabilityDocument>,
}

impl SessionState {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            passwords: HashMap::new(),
            authenticators: HashMap::new(),
            info: HashMap::new(),
        }
    }

    /// The cached authenticator for `auth_id`, built on first use.
    ///
    /// Construction receives any password cached for `auth_id`.
    pub fn get_authenticator(&mut self, auth_id: &str) -> Result<&mut Authenticator, AgentError> {
        match self.authenticators.entry(auth_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let password = self.passwords.get(auth_id);
                let auth = self.snapshot.resolver.resolve(auth_id, password)?;
                debug!(auth_id = %auth_id, provider = auth.provider_name(), "created authenticator");
                Ok(entry.insert(auth))
            }
        }
    }

    /// The cached capability document for the cluster serving `url`.
    pub async fn get_info(&mut self, url: &str) -> Result<CapabilityDocument, AgentError> {
        let key = scheme_host_only(url)?;
        if let Some(doc) = self.info.get(&key) {
            return Ok(doc.clone());
        }
        let mut doc = self.snapshot.fetcher.fetch(url).await?;
        stamp(&mut doc, SystemTime::now());
        info!(cluster = %key, "cached capabilities");
        self.info.insert(key, doc.clone());
        Ok(doc)
    }

    /// Forget everything cached under `target`.
    ///
    /// An absolute URL also drops the document for its cluster.
    pub fn purge(&mut self, target: &str) {
        let mut removed = self.passwords.remove(target).is_some();
        removed |= self.authenticators.remove(target).is_some();
        removed |= self.info.remove(target).is_some();
        if is_absolute_url(target) {
            if let Ok(key) = scheme_host_only(target) {
                removed |= self.info.remove(&key).is_some();
            }
        }
        debug!(target = %target, removed, "purged");
    }

    fn store_password(&mut self, auth_id: &str, password: SecretString) {
        self.passwords.insert(auth_id.to_string(), password);
        self.authenticators.remove(auth_id);
    }
}

/// Future produced by an operation run under the session lock.
pub type StateFuture<'s, T> = Pin<Box<dyn Future<Output = Result<T, AgentError>> + Send + 's>>;

/// Owns the session state and the loader that rebuilds its configuration.
pub struct SessionManager {
    loader: Box<dyn ConfigLoader>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Load the initial configuration.
    pub fn new(loader: Box<dyn ConfigLoader>) -> Result<Self, AgentError> {
        let snapshot = loader.load()?;
        Ok(Self {
            loader,
            state: Mutex::new(SessionState::new(snapshot)),
        })
    }

    /// Settings from the current configuration.
    pub async fn settings(&self) -> AgentSettings {
        self.state.lock().await.snapshot.settings.clone()
    }

    /// Replace the configuration; cached entries are kept.
    pub async fn reload(&self) -> Result<(), AgentError> {
        let snapshot = self.loader.load()?;
        self.state.lock().await.snapshot = snapshot;
        info!("configuration reloaded");
        Ok(())
    }

    /// Run `op` under the lock; purge `auth_id` if it fails with an error
    /// matching `predicate`. The error is returned unchanged either way.
    pub async fn purge_on_error<T, P, F>(
        &self,
        auth_id: &str,
        predicate: P,
        op: F,
    ) -> Result<T, AgentError>
    where
        P: FnOnce(&AgentError) -> bool,
        F: for<'s> FnOnce(&'s mut SessionState) -> StateFuture<'s, T>,
    {
        let mut state = self.state.lock().await;
        let result = op(&mut *state).await;
        match result {
            Err(err) if predicate(&err) => {
                info!(auth_id = %auth_id, error = %err, "purging after failure");
                state.purge(auth_id);
                Err(err)
            }
            other => other,
        }
    }

    /// Store a password and check it by fetching credentials once.
    ///
    /// Any failure purges `auth_id`, password included.
    pub async fn unlock(
        &self,
        auth_id: &str,
        password: SecretString,
    ) -> Result<Credentials, AgentError> {
        let id = auth_id.to_string();
        self.purge_on_error(
            auth_id,
            |_| true,
            move |state| {
                Box::pin(async move {
                    state.store_password(&id, password);
                    state.get_authenticator(&id)?.get_credentials(false).await
                })
            },
        )
        .await
    }

    /// Cached or refreshed credentials. `Unauthorized` purges `auth_id`.
    pub async fn auth(&self, auth_id: &str) -> Result<Credentials, AgentError> {
        let id = auth_id.to_string();
        self.purge_on_error(auth_id, AgentError::is_unauthorized, move |state| {
            Box::pin(async move { state.get_authenticator(&id)?.get_credentials(false).await })
        })
        .await
    }

    /// Freshly issued credentials, stored for later `auth` calls.
    pub async fn reauth(&self, auth_id: &str) -> Result<Credentials, AgentError> {
        let mut state = self.state.lock().await;
        state.get_authenticator(auth_id)?.reauth().await
    }

    pub async fn info(&self, url: &str) -> Result<CapabilityDocument, AgentError> {
        self.state.lock().await.get_info(url).await
    }

    /// Drop the cached document for `url` and fetch it again.
    pub async fn reinfo(&self, url: &str) -> Result<CapabilityDocument, AgentError> {
        let mut state = self.state.lock().await;
        state.purge(url);
        state.get_info(url).await
    }

    pub async fn purge(&self, target: &str) {
        self.state.lock().await.purge(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Outcome, TestRig};
    use swift_agent_core::AuthErrorKind;

    #[tokio::test]
    async fn auth_is_cached_between_calls() {
        let rig = TestRig::new().with_auth("prod", Outcome::ok("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        let first = session.auth("prod").await.unwrap();
        let second = session.auth("prod").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(rig.constructions().len(), 1);
        assert_eq!(rig.logins("prod"), 1);
    }

    #[tokio::test]
    async fn purge_forces_new_authenticator() {
        let rig = TestRig::new().with_auth("prod", Outcome::ok("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        session.auth("prod").await.unwrap();
        session.purge("prod").await;
        session.auth("prod").await.unwrap();
        assert_eq!(rig.constructions().len(), 2);
    }

    #[tokio::test]
    async fn unlock_password_reaches_first_construction() {
        let rig = TestRig::new().with_auth("prod", Outcome::needs_password("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        session.unlock("prod", SecretString::from("pw")).await.unwrap();
        session.auth("prod").await.unwrap();
        assert_eq!(
            rig.constructions(),
            vec![("prod".to_string(), Some("pw".to_string()))]
        );
    }

    #[tokio::test]
    async fn missing_password_is_reported() {
        let rig = TestRig::new().with_auth("prod", Outcome::needs_password("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        let err = session.auth("prod").await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::PasswordRequired));
    }

    #[tokio::test]
    async fn failed_unlock_purges_password() {
        let rig = TestRig::new().with_auth("prod", Outcome::Unauthorized);
        let session = rig.session();

        assert!(session.unlock("prod", SecretString::from("bad")).await.is_err());
        rig.set_outcome("prod", Outcome::needs_password("https://c/v1/AUTH_x", "tok"));
        let err = session.auth("prod").await.unwrap_err();
        assert!(err.is_password_required());
    }

    #[tokio::test]
    async fn unauthorized_auth_purges_everything() {
        // An empty token is never fresh, so every auth goes to the provider.
        let rig = TestRig::new().with_auth("prod", Outcome::needs_password("https://c/v1/AUTH_x", ""));
        let session = rig.session();

        session.unlock("prod", SecretString::from("pw")).await.unwrap();
        rig.set_outcome("prod", Outcome::Unauthorized);
        let err = session.auth("prod").await.unwrap_err();
        assert!(err.is_unauthorized());

        rig.set_outcome("prod", Outcome::needs_password("https://c/v1/AUTH_x", "tok"));
        let err = session.auth("prod").await.unwrap_err();
        assert!(err.is_password_required());
        assert_eq!(
            rig.constructions(),
            vec![
                ("prod".to_string(), Some("pw".to_string())),
                ("prod".to_string(), None)
            ]
        );
    }

    #[tokio::test]
    async fn auth_keeps_cache_on_other_errors() {
        let rig = TestRig::new().with_auth("prod", Outcome::ok("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        session.auth("prod").await.unwrap();
        rig.set_outcome("prod", Outcome::Forbidden);
        assert!(session.reauth("prod").await.is_err());
        assert_eq!(session.auth("prod").await.unwrap().token, "tok");
        assert_eq!(rig.constructions().len(), 1);
    }

    #[tokio::test]
    async fn reauth_forces_fetch_and_stores_result() {
        let rig = TestRig::new().with_auth("prod", Outcome::ok("https://c/v1/AUTH_x", "one"));
        let session = rig.session();

        session.auth("prod").await.unwrap();
        rig.set_outcome("prod", Outcome::ok("https://c/v1/AUTH_x", "two"));
        assert_eq!(session.reauth("prod").await.unwrap().token, "two");
        assert_eq!(session.auth("prod").await.unwrap().token, "two");
        assert_eq!(rig.logins("prod"), 2);
    }

    #[tokio::test]
    async fn info_is_shared_per_cluster() {
        let rig = TestRig::new().with_document("https://cluster.example", r#"{"swift": {}}"#);
        let session = rig.session();

        let a = session.info("https://cluster.example/v1/AUTH_a").await.unwrap();
        let b = session.info("https://cluster.example/v1/AUTH_b/c").await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains_key("timestamp"));
        assert_eq!(rig.fetches(), 1);
    }

    #[tokio::test]
    async fn reinfo_fetches_again() {
        let rig = TestRig::new().with_document("https://cluster.example", r#"{"swift": {}}"#);
        let session = rig.session();

        session.info("https://cluster.example/v1/AUTH_x").await.unwrap();
        session.reinfo("https://cluster.example/v1/AUTH_x").await.unwrap();
        assert_eq!(rig.fetches(), 2);
        session.info("https://cluster.example/").await.unwrap();
        assert_eq!(rig.fetches(), 2);
    }

    #[tokio::test]
    async fn purging_a_url_drops_its_cluster_document() {
        let rig = TestRig::new().with_document("https://cluster.example", r#"{"swift": {}}"#);
        let session = rig.session();

        session.info("https://cluster.example/v1/AUTH_x").await.unwrap();
        session.purge("https://cluster.example/v1/AUTH_y").await;
        session.info("https://cluster.example/v1/AUTH_x").await.unwrap();
        assert_eq!(rig.fetches(), 2);
    }

    #[tokio::test]
    async fn info_rejects_relative_url() {
        let rig = TestRig::new();
        let session = rig.session();
        assert!(matches!(
            session.info("myswift").await,
            Err(AgentError::InvalidUrl { .. })
        ));
        assert_eq!(rig.fetches(), 0);
    }

    #[tokio::test]
    async fn reload_keeps_cache() {
        let rig = TestRig::new().with_auth("prod", Outcome::ok("https://c/v1/AUTH_x", "tok"));
        let session = rig.session();

        session.auth("prod").await.unwrap();
        session.reload().await.unwrap();
        session.auth("prod").await.unwrap();
        assert_eq!(rig.loads(), 2);
        assert_eq!(rig.constructions().len(), 1);
    }

    #[tokio::test]
    async fn purge_of_unknown_target_is_a_no_op() {
        let rig = TestRig::new();
        rig.session().purge("nothing-here").await;
    }
}
