//! Listening socket for the daemon.
//!
//! [`ManualSocketProvider`] binds a Unix socket at a path, replacing any stale
//! socket left behind by a previous run, and restricts it to the owner.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::net::{UnixListener, UnixSocket};
use tracing::debug;

/// Error type for socket provider operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to bind to the socket.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Failed to create the socket directory.
    #[error("failed to create socket directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// Source of the daemon's listener.
pub trait SocketProvider: Send + Sync {
    /// Create and return a listener ready to accept connections.
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>>;

    /// Return the socket path (for logging and cleanup).
    fn socket_path(&self) -> Option<&Path> {
        None
    }
}

/// Socket provider that binds a Unix socket at a fixed path.
pub struct ManualSocketProvider {
    path: PathBuf,
    backlog: u32,
}

impl ManualSocketProvider {
    /// Create a provider with the default backlog of 1.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backlog: 1,
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    async fn bind(&self) -> Result<UnixListener, SocketError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SocketError::DirectoryCreationFailed)?;
                debug!(path = %parent.display(), "Created socket directory");
            }
        }

        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "Failed to remove existing socket: {}",
                    e
                )))
            })?;
            debug!(path = %self.path.display(), "Removed existing socket");
        }

        let socket = UnixSocket::new_stream().map_err(SocketError::BindFailed)?;
        socket.bind(&self.path).map_err(SocketError::BindFailed)?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "Failed to set socket permissions: {}",
                    e
                )))
            })?;
        }

        let listener = socket.listen(self.backlog).map_err(SocketError::BindFailed)?;
        debug!(path = %self.path.display(), backlog = self.backlog, "Socket bound");
        Ok(listener)
    }
}

impl Default for ManualSocketProvider {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl SocketProvider for ManualSocketProvider {
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>> {
        Box::pin(self.bind())
    }

    fn socket_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Get the default socket path.
///
/// Returns `$XDG_RUNTIME_DIR/swift-agent/socket` or falls back to
/// `/tmp/swift-agent-$UID/socket` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("swift-agent").join("socket")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/swift-agent-{}/socket", uid))
    }
}
