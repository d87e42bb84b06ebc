//! Authentication input validation
//!
//! Basic sanitation of names and passwords before they reach the user directory.

/// Longest accepted user name or password
pub const MAX_CREDENTIAL_LENGTH: usize = 64;

/// Performs basic input sanitation to check for malicious or malformed input.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

/// Checks a user name supplied with USER
pub fn is_valid_username(username: &str) -> bool {
    !username.trim().is_empty()
        && !username.contains(['@', '#', ',', '%', '/', '\\'])
        && is_valid_input(username, MAX_CREDENTIAL_LENGTH)
}

/// Checks a password supplied with PASS. Empty passwords are allowed
/// because anonymous clients often send none.
pub fn is_valid_password(password: &str) -> bool {
    is_valid_input(password, MAX_CREDENTIAL_LENGTH)
}
