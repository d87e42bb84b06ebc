//! FTP request parsing
//!
//! Splits a control-connection line into an uppercase verb and an optional
//! argument. Whether a verb is known, or needs an argument, is decided at
//! dispatch.

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpRequest {
    pub verb: String,
    pub argument: Option<String>,
}

impl FtpRequest {
    /// Trimmed argument, `None` when absent or blank
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

/// Parses one request line. Trailing CR/LF is ignored; the verb is matched
/// case-insensitively.
pub fn parse_request(line: &str) -> FtpRequest {
    let trimmed = line.trim_end_matches(['\r', '\n']).trim_start();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_uppercase();
    let argument = parts
        .next()
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(str::to_owned);

    FtpRequest { verb, argument }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_is_uppercased_and_argument_trimmed() {
        let request = parse_request("retr  notes.txt \r\n");
        assert_eq!(request.verb, "RETR");
        assert_eq!(request.argument(), Some("notes.txt"));
    }

    #[test]
    fn argument_keeps_inner_spaces() {
        let request = parse_request("CWD my documents\r\n");
        assert_eq!(request.argument(), Some("my documents"));
    }

    #[test]
    fn blank_argument_is_absent() {
        assert_eq!(parse_request("USER   \r\n").argument, None);
        assert_eq!(parse_request("NOOP").argument, None);
    }

    #[test]
    fn empty_line_has_empty_verb() {
        assert_eq!(parse_request("\r\n").verb, "");
    }
}
