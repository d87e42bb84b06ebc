//! Session commands: NOOP, SYST, TYPE, PWD, CWD, CDUP, REST, ABOR, STAT

use async_trait::async_trait;
use log::debug;

use crate::client::state::TransferType;
use crate::error::CommandError;
use crate::protocol::dispatch::{CommandContext, CommandFlow, CommandHandler};
use crate::protocol::parser::FtpRequest;
use crate::protocol::responses;
use crate::storage::{is_within_root, resolve_virtual_path, virtual_to_real_path};

pub struct Noop;

#[async_trait]
impl CommandHandler for Noop {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        ctx.respond(responses::OK, "NOOP ok")
    }
}

pub struct Syst;

#[async_trait]
impl CommandHandler for Syst {
    fn requires_login(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        ctx.respond(responses::SYSTEM_TYPE, "UNIX Type: L8")
    }
}

pub struct Type;

#[async_trait]
impl CommandHandler for Type {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(argument) = request.argument() else {
            return ctx.missing_argument();
        };

        let transfer_type = match argument.to_ascii_uppercase().as_str() {
            "A" | "A N" => TransferType::Ascii,
            "I" | "L 8" => TransferType::Binary,
            _ => {
                return ctx.respond(
                    responses::NOT_IMPLEMENTED_FOR_PARAMETER,
                    "Command not implemented for that parameter",
                );
            }
        };

        ctx.session.set_transfer_type(transfer_type);
        let code = match transfer_type {
            TransferType::Ascii => "A",
            TransferType::Binary => "I",
        };
        ctx.respond(responses::OK, format!("Type set to {}", code))
    }
}

pub struct Pwd;

#[async_trait]
impl CommandHandler for Pwd {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let text = format!("\"{}\" is current directory", ctx.session.current_dir());
        ctx.respond(responses::PATHNAME_CREATED, text)
    }
}

async fn change_directory(
    ctx: &mut CommandContext<'_>,
    target: &str,
) -> Result<CommandFlow, CommandError> {
    let virtual_path = resolve_virtual_path(ctx.session.current_dir(), target);
    let root = ctx.session.root_directory().to_path_buf();
    let real_path = virtual_to_real_path(&root, &virtual_path);

    let is_dir = tokio::fs::metadata(&real_path)
        .await
        .is_ok_and(|metadata| metadata.is_dir());
    if !is_dir || !is_within_root(&root, &real_path).await {
        debug!("Session {}: CWD to {} refused", ctx.session.id(), virtual_path);
        return ctx.respond(
            responses::FILE_NOT_FOUND,
            format!("{}: No such directory", virtual_path),
        );
    }

    let text = format!("Directory changed to {}", virtual_path);
    ctx.session.set_current_dir(virtual_path);
    ctx.respond(responses::FILE_ACTION_OK, text)
}

pub struct Cwd;

#[async_trait]
impl CommandHandler for Cwd {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(target) = request.argument() else {
            return ctx.missing_argument();
        };
        change_directory(ctx, target).await
    }
}

pub struct Cdup;

#[async_trait]
impl CommandHandler for Cdup {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        change_directory(ctx, "..").await
    }
}

/// Sets the byte offset the next RETR starts from
pub struct Rest;

#[async_trait]
impl CommandHandler for Rest {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(argument) = request.argument() else {
            return ctx.missing_argument();
        };
        let Ok(offset) = argument.parse::<u64>() else {
            return ctx.missing_argument();
        };

        ctx.session.set_restart_offset(offset);
        ctx.respond(
            responses::PENDING_FURTHER_INFO,
            format!("Restarting at {}. Send RETR to initiate transfer", offset),
        )
    }
}

/// Resets transient command state and closes the data channel. The control
/// session stays open and logged in.
pub struct Abor;

#[async_trait]
impl CommandHandler for Abor {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        ctx.session.reset_state();
        if ctx.session.data_channel_mut().close() {
            ctx.reply(responses::TRANSFER_ABORTED, "Connection closed; transfer aborted")?;
        }
        ctx.respond(responses::CLOSING_DATA_CONNECTION, "ABOR command successful")
    }
}

pub struct Stat;

#[async_trait]
impl CommandHandler for Stat {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let statistics = ctx.service.statistics().await;
        let transfer_type = match ctx.session.transfer_type() {
            TransferType::Ascii => "ASCII",
            TransferType::Binary => "BINARY",
        };
        let text = format!(
            "Connected from {}; logged in as {}; type {}; {} connection(s), {} login(s)",
            ctx.session.peer_addr().ip(),
            ctx.session.username().unwrap_or("nobody"),
            transfer_type,
            statistics.current_connections,
            statistics.current_logins,
        );
        ctx.respond(responses::SYSTEM_STATUS, text)
    }
}
