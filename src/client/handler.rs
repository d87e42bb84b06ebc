use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::client::connection::{CloseSignal, ConnectionHandle, ReplySender};
use crate::client::state::{SessionId, SharedSession};
use crate::config::ServerConfig;
use crate::protocol::responses::{self, Reply};
use crate::protocol::{CommandContext, CommandFlow, CommandRegistry, parse_request};
use crate::server::service::ConnectionService;

/// How long a closing connection waits for queued replies to be written
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state every connection task needs
#[derive(Clone)]
pub struct ClientContext {
    pub service: Arc<ConnectionService>,
    pub commands: Arc<CommandRegistry>,
    pub config: Arc<ServerConfig>,
}

enum Inbound {
    Line,
    TooLong,
    Eof,
}

/// Runs one control connection until the client quits, the connection
/// fails, or the server closes it through its `ConnectionHandle`.
///
/// - Replies go through a queue to a writer task that owns the write half.
/// - Each request line is dispatched with the session locked.
/// - On exit the session is closed through the `ConnectionService`.
pub async fn handle_client(
    stream: TcpStream,
    ctx: ClientContext,
    session: SharedSession,
    connection: ConnectionHandle,
    mut close_signal: CloseSignal,
) {
    let peer_addr = connection.peer_addr();
    let session_id = session.lock().await.id().clone();

    let (read_half, write_half) = stream.into_split();
    let (replies, rx) = ReplySender::channel();
    let writer = tokio::spawn(write_replies(
        write_half,
        rx,
        connection.clone(),
        session_id.clone(),
    ));

    let mut server_closed = connection.is_closed();
    if !server_closed {
        let _ = replies.send(Reply::new(
            responses::READY,
            ctx.config.listener.greeting.clone(),
        ));
    }

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let max_length = ctx.config.listener.max_command_length;

    while !server_closed {
        line.clear();
        let inbound = tokio::select! {
            _ = close_signal.closed() => {
                server_closed = true;
                break;
            }
            inbound = read_command(&mut reader, &mut line, max_length) => inbound,
        };

        match inbound {
            Ok(Inbound::Line) => {}
            Ok(Inbound::TooLong) => {
                let _ = replies.send(Reply::new(responses::SYNTAX_ERROR, "Command too long"));
                continue;
            }
            Ok(Inbound::Eof) => {
                info!("Connection closed by client {}", peer_addr);
                break;
            }
            Err(e) => {
                warn!("Failed to read from {}: {}", peer_addr, e);
                break;
            }
        }

        let raw = line.trim_end_matches(['\r', '\n']);
        if let Some(spy) = connection.spy().await {
            spy.request(&session_id, raw);
        }

        let request = parse_request(raw);
        if request.verb == "PASS" {
            debug!("Received from {}: PASS ****", peer_addr);
        } else {
            debug!("Received from {}: {}", peer_addr, raw);
        }

        let flow = {
            let mut session = session.lock().await;
            let mut command = CommandContext {
                service: &ctx.service,
                config: &ctx.config,
                session: &mut *session,
                connection: &connection,
                replies: &replies,
            };
            ctx.commands.dispatch(&mut command, &request).await
        };

        match flow {
            Ok(CommandFlow::Continue) => {}
            Ok(CommandFlow::Close) => {
                info!("Client {} requested to quit", peer_addr);
                break;
            }
            Err(e) => {
                warn!("Command from {} failed: {}", peer_addr, e);
                break;
            }
        }
    }

    if server_closed {
        let _ = replies.send(Reply::new(
            responses::SERVICE_NOT_AVAILABLE,
            "Service closing control connection",
        ));
    }

    ctx.service.close_connection(&session_id).await;

    // The writer ends once every sender is gone.
    drop(replies);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("Reply writer for {} did not finish in time", peer_addr);
    }
    info!("Client {} disconnected", peer_addr);
}

/// Reads one request line into `line`, reading at most `max_length` bytes of
/// it. The remainder of an over-long line is discarded. Bytes that are not
/// valid UTF-8 are replaced rather than rejected.
async fn read_command<R>(reader: &mut R, line: &mut String, max_length: usize) -> io::Result<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the CRLF terminator.
    let limit = max_length as u64 + 2;
    let mut raw = Vec::new();
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut raw).await?;
    if read == 0 {
        return Ok(Inbound::Eof);
    }

    let terminated = raw.last() == Some(&b'\n');
    if !terminated && read as u64 >= limit {
        discard_rest_of_line(reader).await?;
        return Ok(Inbound::TooLong);
    }

    let content_len = raw
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |last| last + 1);
    if content_len > max_length {
        return Ok(Inbound::TooLong);
    }

    line.push_str(&String::from_utf8_lossy(&raw));
    Ok(Inbound::Line)
}

async fn discard_rest_of_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buffer = reader.fill_buf().await?;
        if buffer.is_empty() {
            return Ok(());
        }
        match buffer.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = buffer.len();
                reader.consume(len);
            }
        }
    }
}

/// Writes queued replies in order. A write failure closes the connection.
async fn write_replies(
    mut writer: OwnedWriteHalf,
    mut rx: UnboundedReceiver<Reply>,
    connection: ConnectionHandle,
    session_id: SessionId,
) {
    while let Some(reply) = rx.recv().await {
        if let Some(spy) = connection.spy().await {
            spy.reply(&session_id, &reply.to_string());
        }

        let line = reply.to_line();
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to write reply to {}: {}", connection.peer_addr(), e);
            connection.close();
            return;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn over_long_line_is_skipped_whole() {
        let input: &[u8] = b"NOOP 0123456789ABCDEF\r\nPWD\r\n";
        let mut reader = BufReader::with_capacity(4, input);
        let mut line = String::new();

        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::TooLong
        ));

        line.clear();
        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::Line
        ));
        assert_eq!(line, "PWD\r\n");

        line.clear();
        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::Eof
        ));
    }

    #[tokio::test]
    async fn non_utf8_bytes_are_replaced() {
        let input: &[u8] = b"RETR caf\xe9.txt\r\nNOOP\r\n";
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        assert!(matches!(
            read_command(&mut reader, &mut line, 512).await.unwrap(),
            Inbound::Line
        ));
        assert_eq!(line, "RETR caf\u{FFFD}.txt\r\n");

        line.clear();
        assert!(matches!(
            read_command(&mut reader, &mut line, 512).await.unwrap(),
            Inbound::Line
        ));
        assert_eq!(line, "NOOP\r\n");
    }

    #[tokio::test]
    async fn limit_inside_multibyte_character_is_too_long() {
        let input = "NNNNNNNNN\u{e9}\r\nPWD\r\n".as_bytes();
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::TooLong
        ));

        line.clear();
        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::Line
        ));
        assert_eq!(line, "PWD\r\n");
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let input: &[u8] = b"NOOP1234\r\n";
        let mut reader = BufReader::new(input);
        let mut line = String::new();
        assert!(matches!(
            read_command(&mut reader, &mut line, 8).await.unwrap(),
            Inbound::Line
        ));
    }
}
