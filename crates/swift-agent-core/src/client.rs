//! Blocking client for the agent socket.
//!
//! Connections are cheap and short-lived. A connection should not be held
//! open across a password prompt: the daemon drops idle connections after a
//! second, so [`get_auth_with_unlock`] opens a fresh one after prompting.

use std::env;
use std::fs;
use std::io::{IsTerminal, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroize;

use crate::auth::Credentials;
use crate::cluster::CapabilityDocument;
use crate::error::{AgentError, AuthError};
use crate::line::{read_line, write_line, LineBuffer};
use crate::protocol::{self, verb, ProtocolError};

/// Environment variable naming the daemon socket.
pub const SOCKET_ENV_VAR: &str = "SWIFT_AGENT_SOCK";

/// Environment variable holding the daemon process id.
pub const PID_ENV_VAR: &str = "SWIFT_AGENT_PID";

/// Whether `path` exists and is a Unix socket.
pub fn is_socket(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false)
}

/// The daemon socket named by the environment, if it exists.
pub fn agent_socket() -> Option<PathBuf> {
    env::var_os(SOCKET_ENV_VAR)
        .map(PathBuf::from)
        .filter(|path| is_socket(path))
}

/// One connection to the daemon.
#[derive(Debug)]
pub struct AgentClient {
    stream: UnixStream,
    buffer: LineBuffer,
    closed: bool,
}

impl AgentClient {
    pub fn connect(path: &Path) -> Result<Self, AgentError> {
        let stream = UnixStream::connect(path)?;
        debug!(path = %path.display(), "connected to swift-agent");
        Ok(Self {
            stream,
            buffer: LineBuffer::new(),
            closed: false,
        })
    }

    /// Send one request line and return the raw response line.
    pub fn send_command(&mut self, line: &str) -> Result<String, AgentError> {
        debug!(request = %protocol::redact(line), "tx");
        write_line(&mut self.stream, line)?;
        let response =
            read_line(&mut self.stream, &mut self.buffer)?.ok_or(ProtocolError::ConnectionClosed)?;
        debug!(response = %response, "rx");
        Ok(response)
    }

    /// Send a request and raise any `ERROR` response.
    fn request(&mut self, line: &str) -> Result<String, AgentError> {
        let response = self.send_command(line)?;
        protocol::check_response(&response)?;
        Ok(response)
    }

    pub fn reload(&mut self) -> Result<bool, AgentError> {
        Ok(self.request(verb::RELOAD)? == protocol::RELOADED)
    }

    /// Fetch cached or refreshed credentials.
    pub fn auth(&mut self, auth_name: &str) -> Result<Credentials, AgentError> {
        let response = self.request(&command(verb::AUTH, auth_name)?)?;
        parse_credentials(&response)
    }

    /// Fetch freshly issued credentials.
    pub fn reauth(&mut self, auth_name: &str) -> Result<Credentials, AgentError> {
        let response = self.request(&command(verb::REAUTH, auth_name)?)?;
        parse_credentials(&response)
    }

    /// Hand a password to the daemon.
    pub fn unlock(&mut self, auth_name: &str, password: &SecretString) -> Result<bool, AgentError> {
        let mut line = command(verb::UNLOCK, auth_name)?;
        line.push(' ');
        line.push_str(password.expose_secret());
        let result = self.request(&line);
        line.zeroize();
        Ok(result? == protocol::UNLOCKED)
    }

    /// Forget everything cached for an auth name or cluster URL.
    pub fn purge(&mut self, target: &str) -> Result<bool, AgentError> {
        Ok(self.request(&command(verb::PURGE, target)?)? == protocol::PURGED)
    }

    /// Fetch a cluster's capability document.
    pub fn info(&mut self, url: &str) -> Result<CapabilityDocument, AgentError> {
        let response = self.request(&command(verb::INFO, url)?)?;
        parse_document(&response)
    }

    /// Fetch a cluster's capability document, bypassing the cache.
    pub fn reinfo(&mut self, url: &str) -> Result<CapabilityDocument, AgentError> {
        let response = self.request(&command(verb::REINFO, url)?)?;
        parse_document(&response)
    }

    /// Say goodbye with an empty line and close the socket.
    pub fn close(mut self) -> Result<(), AgentError> {
        self.disconnect()
    }

    fn disconnect(&mut self) -> Result<(), AgentError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.write_all(b"\n")?;
        Ok(())
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn command(verb: &str, arg: &str) -> Result<String, AgentError> {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        return Err(AgentError::InvalidArgument(format!(
            "{verb} needs a single non-empty argument, got {arg:?}"
        )));
    }
    Ok(format!("{verb} {arg}"))
}

fn parse_credentials(response: &str) -> Result<Credentials, AgentError> {
    protocol::parse_auth_response(response).map_err(|_| {
        AuthError::failed(module_path!(), format!("Unexpected response: {response}")).into()
    })
}

fn parse_document(response: &str) -> Result<CapabilityDocument, AgentError> {
    match serde_json::from_str::<Value>(response).map_err(ProtocolError::from)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(ProtocolError::UnexpectedResponse(response.to_string()).into()),
    }
}

/// Source of passwords for interactive unlocks.
pub trait PasswordPrompt: Send + Sync {
    /// Whether a human is available to answer.
    fn is_interactive(&self) -> bool;

    /// Ask for the password of `auth_name` without echo.
    fn prompt(&self, auth_name: &str) -> Result<SecretString, AgentError>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn prompt(&self, auth_name: &str) -> Result<SecretString, AgentError> {
        let password = rpassword::prompt_password(format!("Password for {auth_name}: "))?;
        Ok(SecretString::from(password))
    }
}

/// Fetch credentials from the daemon, unlocking it first if needed.
///
/// When the daemon answers `PasswordRequired` and `prompt` is interactive,
/// the password is read, sent with `unlock` on a new connection, and the
/// request is repeated there. Returns whether a prompt happened along with
/// the credentials.
pub fn get_auth_with_unlock(
    socket: &Path,
    auth_name: &str,
    reauth: bool,
    prompt: &dyn PasswordPrompt,
) -> Result<(bool, Credentials), AgentError> {
    let fetch = |client: &mut AgentClient| {
        if reauth {
            client.reauth(auth_name)
        } else {
            client.auth(auth_name)
        }
    };

    let first = {
        let mut client = AgentClient::connect(socket)?;
        fetch(&mut client)
    };
    match first {
        Err(err) if err.is_password_required() => {
            if !prompt.is_interactive() {
                return Err(err);
            }
            let password = prompt.prompt(auth_name)?;
            let mut client = AgentClient::connect(socket)?;
            client.unlock(auth_name, &password)?;
            Ok((true, fetch(&mut client)?))
        }
        other => other.map(|creds| (false, creds)),
    }
}
