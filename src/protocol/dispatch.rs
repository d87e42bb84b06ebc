//! Command dispatch
//!
//! Maps request verbs to their handlers. Every dispatched request refreshes
//! the session's activity timestamp, whether or not the verb is known.

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;

use crate::client::connection::{ConnectionHandle, ReplySender};
use crate::client::state::Session;
use crate::config::ServerConfig;
use crate::error::CommandError;
use crate::protocol::handlers;
use crate::protocol::parser::FtpRequest;
use crate::protocol::responses::{self, Reply};
use crate::server::service::ConnectionService;

/// What the connection loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlow {
    Continue,
    Close,
}

/// Everything a handler may touch while it runs. The session is borrowed
/// from the locked `SharedSession` for the duration of one command.
pub struct CommandContext<'a> {
    pub service: &'a ConnectionService,
    pub config: &'a ServerConfig,
    pub session: &'a mut Session,
    pub connection: &'a ConnectionHandle,
    pub replies: &'a ReplySender,
}

impl CommandContext<'_> {
    pub fn reply(&self, code: u16, text: impl Into<String>) -> Result<(), CommandError> {
        self.replies.send(Reply::new(code, text))
    }

    /// Queues a reply and keeps the connection open
    pub fn respond(&self, code: u16, text: impl Into<String>) -> Result<CommandFlow, CommandError> {
        self.reply(code, text)?;
        Ok(CommandFlow::Continue)
    }

    /// The 501 reply for a verb whose required argument is missing
    pub fn missing_argument(&self) -> Result<CommandFlow, CommandError> {
        self.respond(
            responses::SYNTAX_ERROR_IN_ARGUMENTS,
            "Syntax error in parameters or arguments",
        )
    }
}

/// A handler for one verb.
///
/// Protocol-level problems are answered with a reply and `Ok`; an `Err`
/// means the control connection itself has failed and ends the session.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn requires_login(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError>;
}

pub struct CommandRegistry {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in verb
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        handlers::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, verb: &'static str, handler: impl CommandHandler + 'static) {
        self.handlers.insert(verb, Box::new(handler));
    }

    pub async fn dispatch(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        ctx.session.touch();

        if request.verb.is_empty() {
            return ctx.respond(responses::SYNTAX_ERROR, "Syntax error, command unrecognized");
        }

        let Some(handler) = self.handlers.get(request.verb.as_str()) else {
            debug!("Session {}: unknown verb {}", ctx.session.id(), request.verb);
            return ctx.respond(responses::NOT_IMPLEMENTED, "Command not implemented");
        };

        if handler.requires_login() && !ctx.session.is_logged_in() {
            return ctx.respond(responses::NOT_LOGGED_IN, "Please login with USER and PASS");
        }

        let flow = handler.execute(ctx, request).await;
        ctx.session.touch();
        flow
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
