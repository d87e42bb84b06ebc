//! Data-channel commands: PASV, PORT, LIST, NLST, RETR
//!
//! The reply to PASV/PORT comes straight from the handler. Transfers queue
//! 150 here, then run on their own task, which queues the closing reply.

use async_trait::async_trait;
use std::fs::Metadata;
use std::path::PathBuf;

use crate::error::CommandError;
use crate::error::handlers::transfer_error_reply;
use crate::protocol::dispatch::{CommandContext, CommandFlow, CommandHandler};
use crate::protocol::parser::FtpRequest;
use crate::protocol::responses;
use crate::storage::{is_within_root, resolve_virtual_path, virtual_to_real_path};
use crate::transfer::{TransferJob, TransferSource, parse_port_argument, passive_reply_text};

pub struct Pasv;

#[async_trait]
impl CommandHandler for Pasv {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        _request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let config = ctx.config;
        match ctx.session.data_channel_mut().open_passive(&config.transfer).await {
            Ok(addr) => ctx.respond(responses::ENTERING_PASSIVE_MODE, passive_reply_text(addr)),
            Err(e) => {
                ctx.replies.send(transfer_error_reply(&e))?;
                Ok(CommandFlow::Continue)
            }
        }
    }
}

pub struct Port;

#[async_trait]
impl CommandHandler for Port {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(argument) = request.argument() else {
            return ctx.missing_argument();
        };

        match parse_port_argument(argument, ctx.session.peer_addr().ip()) {
            Ok(addr) => {
                ctx.session.data_channel_mut().set_active(addr);
                ctx.respond(responses::OK, "PORT command successful")
            }
            Err(e) => {
                ctx.replies.send(transfer_error_reply(&e))?;
                Ok(CommandFlow::Continue)
            }
        }
    }
}

/// Resolves a client path argument to a real path inside the session root,
/// along with its metadata. `None` when the path does not exist or escapes
/// the root.
async fn resolve_existing(ctx: &CommandContext<'_>, target: &str) -> Option<(PathBuf, Metadata)> {
    let virtual_path = resolve_virtual_path(ctx.session.current_dir(), target);
    let root = ctx.session.root_directory();
    let real_path = virtual_to_real_path(root, &virtual_path);
    let metadata = tokio::fs::metadata(&real_path).await.ok()?;
    is_within_root(root, &real_path)
        .await
        .then_some((real_path, metadata))
}

/// Queues 150 and hands `source` to a transfer task on the session's data
/// channel.
fn start_transfer(
    ctx: &mut CommandContext<'_>,
    source: TransferSource,
) -> Result<CommandFlow, CommandError> {
    if ctx.session.data_channel().is_transfer_in_flight() {
        return ctx.respond(
            responses::CANT_OPEN_DATA_CONNECTION,
            "Data connection already in use",
        );
    }

    let mode = match ctx.session.data_channel_mut().take_mode() {
        Ok(mode) => mode,
        Err(e) => {
            ctx.replies.send(transfer_error_reply(&e))?;
            return Ok(CommandFlow::Continue);
        }
    };

    ctx.reply(responses::OPENING_DATA_CONNECTION, "Opening data connection")?;

    let job = TransferJob {
        session_id: ctx.session.id().clone(),
        mode,
        source,
        replies: ctx.replies.clone(),
        connect_timeout: ctx.config.transfer.connection_timeout(),
        buffer_size: ctx.config.transfer.buffer_size,
    };
    ctx.session.data_channel_mut().spawn_transfer(job.run());
    Ok(CommandFlow::Continue)
}

async fn list(
    ctx: &mut CommandContext<'_>,
    request: &FtpRequest,
    names_only: bool,
) -> Result<CommandFlow, CommandError> {
    // Options such as `-la` are accepted and ignored.
    let target = request
        .argument()
        .filter(|arg| !arg.starts_with('-'))
        .unwrap_or(".");

    let path = match resolve_existing(ctx, target).await {
        Some((path, metadata)) if metadata.is_dir() => path,
        _ => {
            return ctx.respond(
                responses::FILE_NOT_FOUND,
                format!("{}: No such directory", target),
            );
        }
    };

    start_transfer(ctx, TransferSource::Listing { path, names_only })
}

pub struct List;

#[async_trait]
impl CommandHandler for List {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        list(ctx, request, false).await
    }
}

pub struct Nlst;

#[async_trait]
impl CommandHandler for Nlst {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        list(ctx, request, true).await
    }
}

pub struct Retr;

#[async_trait]
impl CommandHandler for Retr {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        request: &FtpRequest,
    ) -> Result<CommandFlow, CommandError> {
        let Some(target) = request.argument() else {
            return ctx.missing_argument();
        };

        let path = match resolve_existing(ctx, target).await {
            Some((path, metadata)) if metadata.is_file() => path,
            _ => {
                ctx.session.reset_state();
                return ctx.respond(
                    responses::FILE_NOT_FOUND,
                    format!("{}: No such file", target),
                );
            }
        };

        let offset = ctx.session.take_restart_offset();
        start_transfer(ctx, TransferSource::File { path, offset })
    }
}
