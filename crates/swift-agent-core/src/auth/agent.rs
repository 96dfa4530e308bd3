//! Delegate authentication to a running swift-agent daemon.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use super::{AuthFuture, AuthProvider, Credentials};
use crate::client::{self, PasswordPrompt};
use crate::error::{AgentError, AuthError};

const ORIGIN: &str = module_path!();

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentOptions {
    /// Name of the auth on the daemon side; defaults to the local name.
    #[serde(default)]
    pub auth_name: Option<String>,
}

pub struct AgentAuth {
    auth_name: String,
    socket: PathBuf,
    prompt: Arc<dyn PasswordPrompt>,
    prompted: AtomicBool,
}

impl AgentAuth {
    /// Requires a daemon socket to be present in the environment.
    pub fn new(
        local_name: &str,
        opts: AgentOptions,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Result<Self, AgentError> {
        let socket = client::agent_socket().ok_or_else(|| {
            AuthError::failed(ORIGIN, "agent auth requires a running swift-agent daemon")
        })?;
        Ok(Self::with_socket(local_name, opts, socket, prompt))
    }

    pub fn with_socket(
        local_name: &str,
        opts: AgentOptions,
        socket: PathBuf,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Self {
        Self {
            auth_name: opts.auth_name.unwrap_or_else(|| local_name.to_string()),
            socket,
            prompt,
            prompted: AtomicBool::new(false),
        }
    }

    async fn login(&self) -> Result<Credentials, AgentError> {
        let socket = self.socket.clone();
        let name = self.auth_name.clone();
        let prompt = self.prompt.clone();
        let (prompted, creds) = tokio::task::spawn_blocking(move || {
            client::get_auth_with_unlock(&socket, &name, true, prompt.as_ref())
        })
        .await
        .map_err(|e| AgentError::Daemon(format!("agent request panicked: {e}")))??;
        if prompted {
            self.prompted.store(true, Ordering::Relaxed);
        }
        Ok(creds)
    }
}

impl AuthProvider for AgentAuth {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn fetch(&self) -> AuthFuture<'_> {
        Box::pin(self.login())
    }

    fn ever_prompted(&self) -> bool {
        self.prompted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::line::{read_line, write_line, LineBuffer};
    use secrecy::SecretString;
    use std::os::unix::net::UnixListener;
    use std::thread;

    struct FixedPrompt;

    impl PasswordPrompt for FixedPrompt {
        fn is_interactive(&self) -> bool {
            true
        }

        fn prompt(&self, _auth_name: &str) -> Result<SecretString, AgentError> {
            Ok(SecretString::from("pw"))
        }
    }

    #[tokio::test]
    async fn reauths_through_daemon_and_remembers_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socket");
        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || {
            let replies = [
                vec!["ERROR PasswordRequired(swift_agent_core::config)"],
                vec!["unlocked", "auth https://c/v1/AUTH_x tok"],
            ];
            let mut seen = Vec::new();
            for script in replies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buffer = LineBuffer::new();
                let mut script = script.into_iter();
                while let Some(line) = read_line(&mut stream, &mut buffer).unwrap() {
                    if line.is_empty() {
                        break;
                    }
                    seen.push(line);
                    write_line(&mut stream, script.next().unwrap()).unwrap();
                }
            }
            seen
        });

        let opts = AgentOptions {
            auth_name: Some("remote".into()),
        };
        let provider = AgentAuth::with_socket("local", opts, path, Arc::new(FixedPrompt));
        let mut auth = Authenticator::new(Box::new(provider));

        assert!(!auth.ever_prompted());
        let creds = auth.get_credentials(false).await.unwrap();
        assert_eq!(creds.token, "tok");
        assert!(auth.ever_prompted());
        assert_eq!(
            server.join().unwrap(),
            vec!["reauth remote", "unlock remote pw", "reauth remote"]
        );
    }

    #[test]
    fn auth_name_defaults_to_local_name() {
        let provider = AgentAuth::with_socket(
            "prod",
            AgentOptions::default(),
            PathBuf::from("/nonexistent"),
            Arc::new(FixedPrompt),
        );
        assert_eq!(provider.auth_name, "prod");
    }
}
