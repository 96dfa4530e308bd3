//! Fakes for session and daemon tests.
//!
//! [`TestRig`] is a [`ConfigLoader`] whose snapshots share one set of
//! counters, so tests can script auth outcomes and capability documents and
//! then observe how often the session constructed, logged in, or fetched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use swift_agent_core::auth::AuthFuture;
use swift_agent_core::cluster::{parse_document, FetchFuture};
use swift_agent_core::url::scheme_host_only;
use swift_agent_core::{
    AgentError, AgentSettings, AuthError, AuthProvider, AuthResolver, Authenticator,
    CapabilityFetcher, ConfigError, Credentials,
};

use crate::session::{ConfigLoader, SessionManager, Snapshot};

/// What a fake auth does.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Log in successfully.
    Ok(Credentials),
    /// Refuse construction without a password, then log in.
    NeedsPassword(Credentials),
    Unauthorized,
    Forbidden,
}

impl Outcome {
    pub fn ok(storage_url: &str, token: &str) -> Self {
        Outcome::Ok(Credentials::new(storage_url, token, None))
    }

    pub fn needs_password(storage_url: &str, token: &str) -> Self {
        Outcome::NeedsPassword(Credentials::new(storage_url, token, None))
    }
}

#[derive(Default)]
struct Shared {
    outcomes: Mutex<HashMap<String, Outcome>>,
    constructions: Mutex<Vec<(String, Option<String>)>>,
    logins: Mutex<HashMap<String, usize>>,
    documents: Mutex<HashMap<String, String>>,
    fetches: AtomicUsize,
    loads: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct TestRig {
    shared: Arc<Shared>,
    settings: AgentSettings,
}

impl TestRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(self, auth_id: &str, outcome: Outcome) -> Self {
        self.set_outcome(auth_id, outcome);
        self
    }

    /// Serve `json` for every URL on `cluster`.
    pub fn with_document(self, cluster: &str, json: &str) -> Self {
        self.shared
            .documents
            .lock()
            .unwrap()
            .insert(cluster.to_string(), json.to_string());
        self
    }

    pub fn with_idle_timeout_ms(mut self, millis: u64) -> Self {
        self.settings.idle_timeout_ms = millis;
        self
    }

    pub fn set_outcome(&self, auth_id: &str, outcome: Outcome) {
        self.shared
            .outcomes
            .lock()
            .unwrap()
            .insert(auth_id.to_string(), outcome);
    }

    pub fn session(&self) -> SessionManager {
        SessionManager::new(Box::new(self.clone())).unwrap()
    }

    /// Every construction attempt with the password it received.
    pub fn constructions(&self) -> Vec<(String, Option<String>)> {
        self.shared.constructions.lock().unwrap().clone()
    }

    pub fn logins(&self, auth_id: &str) -> usize {
        self.shared
            .logins
            .lock()
            .unwrap()
            .get(auth_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn fetches(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }
}

impl ConfigLoader for TestRig {
    fn load(&self) -> Result<Snapshot, AgentError> {
        self.shared.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Snapshot {
            resolver: Box::new(CountingResolver {
                shared: self.shared.clone(),
            }),
            fetcher: Box::new(ScriptedFetcher {
                shared: self.shared.clone(),
            }),
            settings: self.settings.clone(),
        })
    }
}

struct CountingResolver {
    shared: Arc<Shared>,
}

impl AuthResolver for CountingResolver {
    fn resolve(
        &self,
        auth_id: &str,
        password: Option<&SecretString>,
    ) -> Result<Authenticator, AgentError> {
        self.shared.constructions.lock().unwrap().push((
            auth_id.to_string(),
            password.map(|p| p.expose_secret().to_string()),
        ));
        let outcome = self
            .shared
            .outcomes
            .lock()
            .unwrap()
            .get(auth_id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAuth(auth_id.to_string()))?;
        if matches!(outcome, Outcome::NeedsPassword(_)) && password.is_none() {
            return Err(AuthError::password_required("fake").into());
        }
        Ok(Authenticator::new(Box::new(FakeProvider {
            auth_id: auth_id.to_string(),
            shared: self.shared.clone(),
        })))
    }
}

struct FakeProvider {
    auth_id: String,
    shared: Arc<Shared>,
}

impl AuthProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn fetch(&self) -> AuthFuture<'_> {
        *self
            .shared
            .logins
            .lock()
            .unwrap()
            .entry(self.auth_id.clone())
            .or_default() += 1;
        let outcome = self.shared.outcomes.lock().unwrap().get(&self.auth_id).cloned();
        Box::pin(async move {
            match outcome {
                Some(Outcome::Ok(creds)) | Some(Outcome::NeedsPassword(creds)) => Ok(creds),
                Some(Outcome::Forbidden) => Err(AuthError::forbidden("fake").into()),
                Some(Outcome::Unauthorized) | None => Err(AuthError::unauthorized("fake").into()),
            }
        })
    }
}

struct ScriptedFetcher {
    shared: Arc<Shared>,
}

impl CapabilityFetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            self.shared.fetches.fetch_add(1, Ordering::SeqCst);
            let key = scheme_host_only(url)?;
            let body = self.shared.documents.lock().unwrap().get(&key).cloned();
            match body {
                Some(body) => parse_document(&body),
                None => Err(AgentError::Http(format!("{key}/info returned 404 Not Found"))),
            }
        })
    }
}
