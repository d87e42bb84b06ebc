//! FTP Protocol implementation
//!
//! Request parsing, verb dispatch, the built-in command handlers and reply
//! codes.

pub mod dispatch;
pub mod handlers;
pub mod parser;
pub mod responses;

pub use dispatch::{CommandContext, CommandFlow, CommandHandler, CommandRegistry};
pub use parser::{FtpRequest, parse_request};
pub use responses::Reply;
