//! FTP Transfer modes
//!
//! How the next data connection is established.

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Data connection setup chosen by PASV or PORT
#[derive(Debug)]
pub enum DataMode {
    /// Server listens, client connects (PASV)
    Passive(TcpListener),
    /// Server connects to the client's address (PORT)
    Active(SocketAddr),
}

impl DataMode {
    pub fn is_passive(&self) -> bool {
        matches!(self, DataMode::Passive(_))
    }
}
