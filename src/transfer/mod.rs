//! Transfer module for FTP server
//!
//! Handles the per-session data channel and the transfers that run over it.

pub mod data_channel;
pub mod modes;
pub mod operations;

pub use data_channel::DataChannel;
pub use modes::DataMode;
pub use operations::{TransferJob, TransferSource, parse_port_argument, passive_reply_text};
