//! Error handling
//!
//! Defines error types and their mapping to FTP replies.

pub mod handlers;
pub mod types;

pub use types::*;
