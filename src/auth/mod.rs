//! Authentication system
//!
//! Credentials, input validation, and the user directory boundary.

pub mod credentials;
pub mod directory;
pub mod validator;

pub use credentials::{Credentials, InMemoryUserDirectory, is_anonymous_name};
pub use directory::{ANONYMOUS, UserDirectory, UserRecord};
