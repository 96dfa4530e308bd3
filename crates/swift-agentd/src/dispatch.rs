//! Verb routing.
//!
//! A [`Dispatcher`] is a fixed table from verb to handler function, built once
//! at startup. It owns no state: handlers receive the shared state and the
//! argument string, and the dispatcher turns their failures into `ERROR`
//! lines so that one bad request never ends a connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use swift_agent_core::protocol::{error_line, split_command, unknown_command};
use swift_agent_core::AgentError;
use tracing::warn;

/// Future returned by a handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AgentError>> + Send + 'a>>;

/// A command handler: shared state plus the text after the verb.
pub type Handler<S> = for<'a> fn(&'a S, &'a str) -> HandlerFuture<'a>;

pub struct Dispatcher<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S: Sync> Dispatcher<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `verb`, replacing any previous one.
    pub fn register(mut self, verb: &'static str, handler: Handler<S>) -> Self {
        self.handlers.insert(verb, handler);
        self
    }

    /// Registered verbs, sorted.
    pub fn verbs(&self) -> Vec<&'static str> {
        let mut verbs: Vec<_> = self.handlers.keys().copied().collect();
        verbs.sort_unstable();
        verbs
    }

    /// Route one request line and produce exactly one response line.
    pub async fn dispatch(&self, state: &S, line: &str) -> String {
        let (verb, rest) = split_command(line);
        let Some(handler) = self.handlers.get(verb) else {
            warn!(verb, "unknown command");
            return unknown_command(verb);
        };
        match handler(state, rest).await {
            Ok(output) if output.contains('\n') => {
                warn!(verb, "handler produced a multi-line response");
                error_line(&format!("{verb} produced a multi-line response"))
            }
            Ok(output) => output,
            Err(err) => {
                warn!(verb, error = %err, "command failed");
                error_line(&err)
            }
        }
    }
}
