//! Error types
//!
//! Defines domain-specific error types for each part of the control core.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Listener lifecycle errors
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind control endpoint {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Listener cannot start from state {0}")]
    InvalidState(&'static str),
}

/// User directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User directory I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to reload user directory: {0}")]
    Reload(String),

    #[error("Invalid user record: {0}")]
    InvalidRecord(String),
}

/// Reasons a login attempt is refused. The session stays connected in every case.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Session is closed")]
    SessionClosed,

    #[error("Username or password missing")]
    MissingCredentials,

    #[error("Authentication failed for user: {0}")]
    InvalidCredentials(String),

    #[error("Account no longer exists: {0}")]
    UnknownAccount(String),

    #[error("Account is disabled: {0}")]
    AccountDisabled(String),

    #[error("Anonymous login is not allowed")]
    AnonymousDisallowed,

    #[error("Too many logged-in users ({current}/{limit})")]
    TooManyLogins { current: usize, limit: usize },

    #[error("Too many anonymous users ({current}/{limit})")]
    TooManyAnonymousLogins { current: usize, limit: usize },

    #[error("Home directory not found: {}", .0.display())]
    HomeNotFound(PathBuf),

    #[error("Home path is not a directory: {}", .0.display())]
    HomeNotADirectory(PathBuf),

    #[error("Cannot create home directory {}: {source}", path.display())]
    HomeCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Data channel errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Data channel not initialized")]
    DataChannelNotInitialized,

    #[error("No available port for data connection")]
    NoAvailablePort,

    #[error("Passive address is not an IP address: {0}")]
    InvalidPassiveAddress(String),

    #[error("Invalid PORT command: {0}")]
    InvalidPortCommand(String),

    #[error("IP mismatch: expected {expected}, got {provided}")]
    IpMismatch { expected: String, provided: String },

    #[error("Timeout waiting for data connection with {0}")]
    ConnectionTimeout(SocketAddr),

    #[error("Data connection failed: {0}")]
    Io(#[from] io::Error),
}

/// Transport-level faults raised while executing a command. Any of these
/// terminates the connection; protocol-level problems are replies instead.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Reply channel closed")]
    ReplyChannelClosed,
}
