//! Main daemon orchestration.
//!
//! The [`Daemon`] accepts connections on the listening socket and serves each
//! one to completion before accepting the next. A connection is a sequence of
//! request lines, each answered by exactly one response line, until the peer
//! closes, sends an empty line, or stays idle past the configured timeout.

use std::time::Duration;

use swift_agent_core::line::{read_line_async, write_line_async, LineBuffer};
use swift_agent_core::protocol::{error_line, redact, split_command, ERROR_PREFIX};
use swift_agent_core::ProtocolError;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::commands::agent_dispatcher;
use crate::dispatch::Dispatcher;
use crate::session::SessionManager;
use crate::socket::SocketProvider;

/// The agent: a socket, the session state, and the verb table.
pub struct Daemon<P: SocketProvider> {
    socket_provider: P,
    session: SessionManager,
    dispatcher: Dispatcher<SessionManager>,
}

impl<P: SocketProvider> Daemon<P> {
    pub fn new(socket_provider: P, session: SessionManager) -> Self {
        Self {
            socket_provider,
            session,
            dispatcher: agent_dispatcher(),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Bind the socket and serve until the task is dropped.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.socket_provider.listen().await?;
        info!(
            path = ?self.socket_provider.socket_path(),
            "Daemon listening for connections"
        );
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener, one at a time.
    pub async fn serve(&self, listener: UnixListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Accepted connection");
                    self.handle_connection(stream).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) {
        let idle = self.session.settings().await.idle_timeout();
        let (mut reader, mut writer) = stream.into_split();
        let mut buffer = LineBuffer::new();

        loop {
            let line = match tokio::time::timeout(idle, read_line_async(&mut reader, &mut buffer))
                .await
            {
                Err(_) => {
                    info!(timeout_ms = idle.as_millis() as u64, "Closing idle connection");
                    return;
                }
                Ok(Ok(Some(line))) if !line.is_empty() => line,
                Ok(Ok(_)) => {
                    debug!("Client disconnected");
                    return;
                }
                Ok(Err(ProtocolError::InvalidUtf8)) => {
                    warn!("Request is not valid UTF-8");
                    let reply = error_line(&ProtocolError::InvalidUtf8);
                    if !send(&mut writer, &reply, idle).await {
                        return;
                    }
                    continue;
                }
                Ok(Err(e @ ProtocolError::LineTooLong(_))) => {
                    warn!(error = %e, "Dropping connection");
                    send(&mut writer, &error_line(&e), idle).await;
                    return;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to read request");
                    return;
                }
            };

            debug!(request = %redact(&line), "Request");
            let response = self.dispatcher.dispatch(&self.session, &line).await;
            if response.starts_with(ERROR_PREFIX) {
                debug!(response = %response, "Response");
            } else {
                debug!(verb = split_command(&line).0, "Response sent");
            }

            if !send(&mut writer, &response, idle).await {
                return;
            }
        }
    }
}

/// Write one response line, giving up after `idle`.
///
/// Returns false when the connection should be dropped.
async fn send(writer: &mut OwnedWriteHalf, line: &str, idle: Duration) -> bool {
    match tokio::time::timeout(idle, write_line_async(writer, line)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "Failed to send response");
            false
        }
        Err(_) => {
            info!(timeout_ms = idle.as_millis() as u64, "Peer is not reading, closing connection");
            false
        }
    }
}
