//! Error handlers
//!
//! Converts recoverable errors into the reply a client should see.

use crate::error::types::{LoginError, TransferError};
use crate::protocol::responses::{self, Reply};

/// Convert a refused login into its 530 reply
pub fn login_error_reply(err: &LoginError) -> Reply {
    let text = match err {
        LoginError::TooManyLogins { .. } | LoginError::TooManyAnonymousLogins { .. } => {
            "Too many users logged in, try again later"
        }
        LoginError::AnonymousDisallowed => "Anonymous login not allowed",
        LoginError::HomeNotFound(_)
        | LoginError::HomeNotADirectory(_)
        | LoginError::HomeCreationFailed { .. } => "Home directory unavailable",
        _ => "Login incorrect",
    };
    Reply::new(responses::NOT_LOGGED_IN, text)
}

/// Convert a data-channel failure into its reply
pub fn transfer_error_reply(err: &TransferError) -> Reply {
    match err {
        TransferError::InvalidPortCommand(_) | TransferError::IpMismatch { .. } => {
            Reply::new(responses::SYNTAX_ERROR_IN_ARGUMENTS, err.to_string())
        }
        TransferError::DataChannelNotInitialized => Reply::new(
            responses::CANT_OPEN_DATA_CONNECTION,
            "Use PORT or PASV first",
        ),
        TransferError::Io(_) => Reply::new(
            responses::TRANSFER_ABORTED,
            "Connection closed; transfer aborted",
        ),
        TransferError::NoAvailablePort
        | TransferError::InvalidPassiveAddress(_)
        | TransferError::ConnectionTimeout(_) => Reply::new(
            responses::CANT_OPEN_DATA_CONNECTION,
            "Can't open data connection",
        ),
    }
}
