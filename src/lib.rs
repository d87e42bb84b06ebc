//! Control core of an FTP server: the listener, the connection service that
//! owns every session, command dispatch and the per-session data channel.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;

pub use config::ServerConfig;
pub use server::{ConnectionService, Listener};
