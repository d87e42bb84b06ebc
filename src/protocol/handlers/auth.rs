//! Login commands: USER, PASS, REIN, QUIT

use async_trait::async_trait;
use log::info;

use crate::auth::validator::{is_valid_password, is_valid_username};
use crate::auth::{Credentials, is_anonymous_name};
use crate::client::state::LoginState;
use crate::error::CommandError;
use crate::error::handlers::login_error_reply;
use crate::protocol::dispatch::{CommandContext, CommandFlow, CommandHandler};
use crate::protocol::parser::FtpRequest;
use crate::protocol::responses;

pub struct User;

#[async_trait]
impl CommandHandler for User {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(username) = request.argument() else {
            return ctx.missing_argument();
        };

        if ctx.session.is_logged_in() {
            return ctx.respond(
                responses::NOT_LOGGED_IN,
                "Already logged in; send REIN to change user",
            );
        }

        if !is_valid_username(username) {
            return ctx.respond(responses::SYNTAX_ERROR_IN_ARGUMENTS, "Invalid user name");
        }

        let anonymous = is_anonymous_name(username);
        ctx.session.set_pending_user(username.to_string(), anonymous);

        if anonymous {
            ctx.respond(
                responses::PASSWORD_REQUIRED,
                "Guest login okay, send your e-mail address as password",
            )
        } else {
            ctx.respond(responses::PASSWORD_REQUIRED, "User name okay, need password")
        }
    }
}

pub struct Pass;

#[async_trait]
impl CommandHandler for Pass {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        if ctx.session.is_logged_in() {
            return ctx.respond(responses::LOGIN_SUCCESS, "Already logged in");
        }

        let LoginState::UserPending { username, anonymous } = ctx.session.login_state().clone() else {
            return ctx.respond(responses::BAD_SEQUENCE, "Login with USER first");
        };

        let password = match request.argument() {
            Some(password) => password,
            None if anonymous => "",
            None => return ctx.missing_argument(),
        };
        if !is_valid_password(password) {
            ctx.session.clear_pending_user();
            return ctx.respond(responses::SYNTAX_ERROR_IN_ARGUMENTS, "Invalid password");
        }

        let credentials = Credentials::new(username, password);
        match ctx.service.login(ctx.session, credentials).await {
            Ok(()) => ctx.respond(responses::LOGIN_SUCCESS, "User logged in, proceed"),
            Err(e) => {
                info!("Session {}: login refused: {}", ctx.session.id(), e);
                ctx.session.clear_pending_user();
                ctx.replies.send(login_error_reply(&e))?;
                Ok(CommandFlow::Continue)
            }
        }
    }
}

/// Returns the session to the pre-login state without closing it
pub struct Rein;

#[async_trait]
impl CommandHandler for Rein {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        if !ctx.service.logout(ctx.session).await {
            ctx.session.clear_pending_user();
        }
        ctx.respond(responses::READY, "Service ready for new user")
    }
}

pub struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        ctx.reply(responses::CLOSING_CONTROL_CONNECTION, "Goodbye")?;
        Ok(CommandFlow::Close)
    }
}
