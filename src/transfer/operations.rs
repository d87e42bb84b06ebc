//! Transfer operations
//!
//! Establishes data connections and moves bytes for LIST/NLST/RETR. Each
//! transfer runs in its own task and reports completion on the control
//! connection's reply channel.

use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::client::connection::ReplySender;
use crate::client::state::SessionId;
use crate::error::TransferError;
use crate::error::handlers::transfer_error_reply;
use crate::protocol::responses::{self, Reply};
use crate::transfer::modes::DataMode;

/// What a transfer sends to the client
#[derive(Debug, Clone)]
pub enum TransferSource {
    /// Directory listing; `names_only` for NLST
    Listing { path: PathBuf, names_only: bool },
    /// File contents starting at `offset` (set by REST)
    File { path: PathBuf, offset: u64 },
}

/// One queued data transfer
pub struct TransferJob {
    pub session_id: SessionId,
    pub mode: DataMode,
    pub source: TransferSource,
    pub replies: ReplySender,
    pub connect_timeout: Duration,
    pub buffer_size: usize,
}

impl TransferJob {
    /// Runs the transfer to completion and queues the final reply.
    pub async fn run(self) {
        let reply = match self.transfer().await {
            Ok(bytes) => {
                info!("Session {}: transfer complete ({} bytes)", self.session_id, bytes);
                Reply::new(responses::CLOSING_DATA_CONNECTION, "Transfer complete")
            }
            Err(e) => {
                warn!("Session {}: transfer failed: {}", self.session_id, e);
                transfer_error_reply(&e)
            }
        };

        // The control connection may already be gone.
        let _ = self.replies.send(reply);
    }

    async fn transfer(&self) -> Result<u64, TransferError> {
        let mut stream = open_data_stream(&self.mode, self.connect_timeout).await?;

        let bytes = match &self.source {
            TransferSource::Listing { path, names_only } => {
                let listing = render_listing(path, *names_only).await?;
                stream.write_all(listing.as_bytes()).await?;
                listing.len() as u64
            }
            TransferSource::File { path, offset } => {
                let mut file = tokio::fs::File::open(path).await?;
                if *offset > 0 {
                    file.seek(std::io::SeekFrom::Start(*offset)).await?;
                }
                let mut reader = BufReader::with_capacity(self.buffer_size, file);
                tokio::io::copy_buf(&mut reader, &mut stream).await?
            }
        };

        stream.shutdown().await?;
        Ok(bytes)
    }
}

/// Connects the data channel according to the prepared mode.
pub async fn open_data_stream(
    mode: &DataMode,
    connect_timeout: Duration,
) -> Result<TcpStream, TransferError> {
    match mode {
        DataMode::Passive(listener) => {
            let local_addr = listener.local_addr()?;
            let (stream, peer) = timeout(connect_timeout, listener.accept())
                .await
                .map_err(|_| TransferError::ConnectionTimeout(local_addr))??;
            debug!("Passive data connection accepted from {}", peer);
            Ok(stream)
        }
        DataMode::Active(addr) => {
            let stream = timeout(connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransferError::ConnectionTimeout(*addr))??;
            debug!("Active data connection established to {}", addr);
            Ok(stream)
        }
    }
}

async fn render_listing(path: &Path, names_only: bool) -> Result<String, TransferError> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut lines = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if names_only {
            lines.push(name);
            continue;
        }

        let metadata = entry.metadata().await?;
        let kind = if metadata.is_dir() { 'd' } else { '-' };
        lines.push(format!(
            "{}rw-r--r-- 1 ftp ftp {:>12} {}",
            kind,
            metadata.len(),
            name
        ));
    }

    lines.sort();
    let mut listing = lines.join("\r\n");
    if !listing.is_empty() {
        listing.push_str("\r\n");
    }
    Ok(listing)
}

/// Parses a PORT argument `h1,h2,h3,h4,p1,p2` and checks it names the
/// client's own host.
pub fn parse_port_argument(argument: &str, peer_ip: IpAddr) -> Result<SocketAddr, TransferError> {
    let fields = argument
        .split(',')
        .map(|field| field.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| TransferError::InvalidPortCommand("Invalid address format".into()))?;

    let [h1, h2, h3, h4, p1, p2] = fields[..] else {
        return Err(TransferError::InvalidPortCommand(
            "Expected six comma-separated numbers".into(),
        ));
    };

    let ip = IpAddr::V4(Ipv4Addr::new(h1, h2, h3, h4));
    let port = (u16::from(p1) << 8) | u16::from(p2);

    if port == 0 {
        return Err(TransferError::InvalidPortCommand("Port cannot be 0".into()));
    }

    if ip != peer_ip {
        return Err(TransferError::IpMismatch {
            expected: peer_ip.to_string(),
            provided: ip.to_string(),
        });
    }

    Ok(SocketAddr::new(ip, port))
}

/// Formats the 227 reply text for a passive listener
pub fn passive_reply_text(addr: SocketAddr) -> String {
    let octets = match addr.ip() {
        IpAddr::V4(ip) => ip.octets(),
        IpAddr::V6(_) => [127, 0, 0, 1],
    };
    format!(
        "Entering Passive Mode ({},{},{},{},{},{})",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        addr.port() >> 8,
        addr.port() & 0xff
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn parses_port_argument() {
        let addr = parse_port_argument("127,0,0,1,7,208", LOCALHOST).unwrap();
        assert_eq!(addr, "127.0.0.1:2000".parse().unwrap());
    }

    #[test]
    fn rejects_foreign_port_host() {
        let err = parse_port_argument("10,0,0,1,7,208", LOCALHOST).unwrap_err();
        assert!(matches!(err, TransferError::IpMismatch { .. }));
    }

    #[test]
    fn rejects_malformed_port_argument() {
        assert!(parse_port_argument("127,0,0,1,7", LOCALHOST).is_err());
        assert!(parse_port_argument("127,0,0,1,7,999", LOCALHOST).is_err());
    }

    #[test]
    fn passive_reply_encodes_port() {
        let text = passive_reply_text("127.0.0.1:2122".parse().unwrap());
        assert_eq!(text, "Entering Passive Mode (127,0,0,1,8,74)");
    }

    #[tokio::test]
    async fn file_transfer_honours_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (replies, mut reply_rx) = ReplySender::channel();

        let job = TransferJob {
            session_id: SessionId::new(),
            mode: DataMode::Passive(listener),
            source: TransferSource::File { path, offset: 4 },
            replies,
            connect_timeout: Duration::from_secs(5),
            buffer_size: 4,
        };
        let task = tokio::spawn(job.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        task.await.unwrap();

        assert_eq!(received, b"456789");
        assert_eq!(reply_rx.recv().await.unwrap().code(), 226);
    }

    #[tokio::test]
    async fn unreachable_data_port_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (replies, mut reply_rx) = ReplySender::channel();

        let job = TransferJob {
            session_id: SessionId::new(),
            mode: DataMode::Passive(listener),
            source: TransferSource::Listing {
                path: PathBuf::from("."),
                names_only: true,
            },
            replies,
            connect_timeout: Duration::from_millis(50),
            buffer_size: 1024,
        };
        job.run().await;

        assert_eq!(reply_rx.recv().await.unwrap().code(), 425);
    }
}
