//! POP3 (RFC 1939) lines needed to log in.

use std::fmt;
use secrecy::ExposeSecret;

use crate::auth::Credentials;
use crate::errors::RawProbeError;

/// POP3 commands issued by a probe.
#[derive(Clone, Copy)]
pub enum Pop3Command<'a> {
    /// List capabilities (RFC 2449).
    Capa,
    /// Start TLS negotiation (RFC 2595).
    Stls,
    /// Send the username.
    User(&'a Credentials),
    /// Send the password.
    Pass(&'a Credentials),
    /// End the session.
    Quit,
}

impl Pop3Command<'_> {
    /// Formats the command for sending.
    pub fn to_pop3_string(&self) -> String {
        match self {
            Pop3Command::Capa => "CAPA".to_string(),
            Pop3Command::Stls => "STLS".to_string(),
            Pop3Command::User(creds) => format!("USER {}", creds.username),
            Pop3Command::Pass(creds) => format!("PASS {}", creds.password.expose_secret()),
            Pop3Command::Quit => "QUIT".to_string(),
        }
    }
}

impl fmt::Debug for Pop3Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pop3Command::Pass(_) => f.write_str("PASS [REDACTED]"),
            other => f.write_str(&other.to_pop3_string()),
        }
    }
}

/// Status line of a POP3 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Response {
    /// `+OK` versus `-ERR`.
    pub ok: bool,
    /// Text after the status indicator.
    pub text: String,
}

impl Pop3Response {
    /// Parses a status line.
    pub fn parse(line: &str) -> Result<Self, RawProbeError> {
        let (ok, rest) = if let Some(rest) = strip_prefix_ci(line, "+OK") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ci(line, "-ERR") {
            (false, rest)
        } else {
            return Err(RawProbeError::protocol(format!("invalid POP3 reply: {}", line)));
        };

        Ok(Self {
            ok,
            text: rest.trim().to_string(),
        })
    }

    /// Converts a `-ERR` reply to PASS into a raw error.
    ///
    /// RFC 3206 codes like `[SYS/TEMP]` and `[IN-USE]` mean the server is
    /// busy, which the classifier reads out of the response text.
    pub fn to_auth_error(&self) -> RawProbeError {
        RawProbeError::auth_rejected(if self.text.is_empty() {
            "-ERR".to_string()
        } else {
            self.text.clone()
        })
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

/// Returns true if `line` terminates a multiline reply.
pub fn is_terminator(line: &str) -> bool {
    line == "."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::errors::ErrorKind;

    #[test]
    fn test_parse_status_lines() {
        let ok = Pop3Response::parse("+OK POP3 server ready <1896.697170952@dbc.mtview.ca.us>").unwrap();
        assert!(ok.ok);
        assert!(ok.text.starts_with("POP3 server ready"));

        let err = Pop3Response::parse("-ERR [AUTH] invalid password").unwrap();
        assert!(!err.ok);
        assert_eq!(err.text, "[AUTH] invalid password");

        assert!(Pop3Response::parse("OK").is_err());
        assert!(Pop3Response::parse("+o").is_err());
    }

    #[test]
    fn test_pass_is_redacted() {
        let creds = Credentials::new("user", "hunter2");
        assert_eq!(Pop3Command::Pass(&creds).to_pop3_string(), "PASS hunter2");
        assert_eq!(format!("{:?}", Pop3Command::Pass(&creds)), "PASS [REDACTED]");
    }

    #[test]
    fn test_auth_error_classification() {
        let busy = Pop3Response::parse("-ERR [IN-USE] maildrop locked").unwrap();
        assert_eq!(classify(&busy.to_auth_error()), ErrorKind::ServerProblem);

        let wrong = Pop3Response::parse("-ERR authentication failed").unwrap();
        assert_eq!(classify(&wrong.to_auth_error()), ErrorKind::BadUserOrPass);

        // A bare -ERR still means PASS was refused.
        let bare = Pop3Response::parse("-ERR").unwrap();
        assert_eq!(classify(&bare.to_auth_error()), ErrorKind::BadUserOrPass);
    }
}
