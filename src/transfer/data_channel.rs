//! Module `data_channel`
//!
//! Per-session data channel. Holds the pending PASV/PORT setup and the task
//! running the current transfer. Closing it interrupts the transfer without
//! touching the control connection.

use log::{debug, info, warn};
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::transfer::modes::DataMode;

#[derive(Debug, Default)]
pub struct DataChannel {
    mode: Option<DataMode>,
    transfer: Option<JoinHandle<()>>,
}

impl DataChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when PASV or PORT has prepared the next data connection.
    pub fn is_configured(&self) -> bool {
        self.mode.is_some()
    }

    /// Returns true while a transfer task is still running.
    pub fn is_transfer_in_flight(&self) -> bool {
        self.transfer
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Binds a passive listener on the first free port of the configured range,
    /// replacing any previous setup.
    pub async fn open_passive(&mut self, config: &TransferConfig) -> Result<SocketAddr, TransferError> {
        self.mode = None;

        let ip = config
            .passive_ip()
            .ok_or_else(|| TransferError::InvalidPassiveAddress(config.passive_address.clone()))?;

        for port in config.passive_port_range() {
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    debug!("Passive data listener bound to {}", local_addr);
                    self.mode = Some(DataMode::Passive(listener));
                    return Ok(local_addr);
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => continue,
                Err(e) => return Err(TransferError::Io(e)),
            }
        }

        Err(TransferError::NoAvailablePort)
    }

    /// Records the client's address for an active-mode connection.
    pub fn set_active(&mut self, data_socket: SocketAddr) {
        self.mode = Some(DataMode::Active(data_socket));
    }

    /// Hands the prepared setup to a transfer. Each setup serves one transfer.
    pub fn take_mode(&mut self) -> Result<DataMode, TransferError> {
        self.mode
            .take()
            .ok_or(TransferError::DataChannelNotInitialized)
    }

    /// Runs `transfer` as an independent task owned by this channel.
    pub fn spawn_transfer<F>(&mut self, transfer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.transfer.take() {
            if !previous.is_finished() {
                warn!("Replacing a transfer that is still running");
                previous.abort();
            }
        }
        self.transfer = Some(tokio::spawn(transfer));
    }

    /// Closes the data channel: aborts the running transfer, dropping its
    /// sockets, and discards any pending setup. Returns true if a transfer
    /// was interrupted. Closing an idle channel is a no-op.
    pub fn close(&mut self) -> bool {
        self.mode = None;

        match self.transfer.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                info!("Data transfer aborted");
                true
            }
            _ => false,
        }
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        if let Some(task) = self.transfer.take() {
            task.abort();
        }
    }
}
