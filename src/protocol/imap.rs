//! IMAP4rev1 (RFC 3501) lines needed to log in.

use std::fmt;
use secrecy::ExposeSecret;

use crate::auth::{imap_quote, Credentials};
use crate::errors::RawProbeError;

/// Status word of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapStatus {
    /// Success.
    Ok,
    /// Operational failure.
    No,
    /// Protocol-level failure.
    Bad,
    /// Server is closing the connection.
    Bye,
    /// Connection is already authenticated.
    Preauth,
}

impl ImapStatus {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(ImapStatus::Ok),
            "NO" => Some(ImapStatus::No),
            "BAD" => Some(ImapStatus::Bad),
            "BYE" => Some(ImapStatus::Bye),
            "PREAUTH" => Some(ImapStatus::Preauth),
            _ => None,
        }
    }
}

/// One server response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapResponse {
    /// `* ...` line. `status` is set for status responses such as the greeting.
    Untagged {
        /// Status word, if the line is a status response.
        status: Option<ImapStatus>,
        /// Remaining text.
        text: String,
    },
    /// Completion of a tagged command.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: ImapStatus,
        /// Human-readable text, possibly with a response code.
        text: String,
    },
    /// `+ ...` continuation request.
    Continuation(String),
}

impl ImapResponse {
    /// Parses a response line.
    pub fn parse(line: &str) -> Result<Self, RawProbeError> {
        let (head, rest) = split_word(line);
        match head {
            "" => Err(RawProbeError::protocol("empty IMAP response")),
            "+" => Ok(ImapResponse::Continuation(rest.to_string())),
            "*" => {
                let (word, text) = split_word(rest);
                Ok(match ImapStatus::parse(word) {
                    Some(status) => ImapResponse::Untagged {
                        status: Some(status),
                        text: text.to_string(),
                    },
                    None => ImapResponse::Untagged {
                        status: None,
                        text: rest.to_string(),
                    },
                })
            }
            tag => {
                let (word, text) = split_word(rest);
                let status = ImapStatus::parse(word)
                    .ok_or_else(|| RawProbeError::protocol(format!("invalid IMAP response: {}", line)))?;
                Ok(ImapResponse::Tagged {
                    tag: tag.to_string(),
                    status,
                    text: text.to_string(),
                })
            }
        }
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(' ') {
        Some(i) => (&s[..i], s[i + 1..].trim_start()),
        None => (s, ""),
    }
}

/// Capabilities relevant to logging in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImapCapabilities {
    /// STARTTLS supported.
    pub starttls: bool,
    /// LOGIN refused until TLS is active.
    pub login_disabled: bool,
    /// Raw capability atoms, uppercased.
    pub raw: Vec<String>,
}

impl ImapCapabilities {
    /// Parses capabilities from an untagged `CAPABILITY ...` line or a
    /// `[CAPABILITY ...]` response code.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_start();
        let body = if let Some(inner) = text.strip_prefix('[') {
            inner.split(']').next().unwrap_or("")
        } else {
            text
        };

        let mut atoms = body.split_whitespace();
        if !atoms.next()?.eq_ignore_ascii_case("CAPABILITY") {
            return None;
        }

        let raw: Vec<String> = atoms.map(|a| a.to_ascii_uppercase()).collect();
        Some(Self {
            starttls: raw.iter().any(|a| a == "STARTTLS"),
            login_disabled: raw.iter().any(|a| a == "LOGINDISABLED"),
            raw,
        })
    }
}

/// IMAP commands issued by a probe.
#[derive(Clone, Copy)]
pub enum ImapCommand<'a> {
    /// Ask for capabilities.
    Capability,
    /// Start TLS negotiation.
    StartTls,
    /// Plaintext login.
    Login(&'a Credentials),
    /// Close the session.
    Logout,
}

impl ImapCommand<'_> {
    /// Formats the command with its tag.
    pub fn to_imap_string(&self, tag: &str) -> String {
        match self {
            ImapCommand::Capability => format!("{} CAPABILITY", tag),
            ImapCommand::StartTls => format!("{} STARTTLS", tag),
            ImapCommand::Login(creds) => format!(
                "{} LOGIN {} {}",
                tag,
                imap_quote(&creds.username),
                imap_quote(creds.password.expose_secret())
            ),
            ImapCommand::Logout => format!("{} LOGOUT", tag),
        }
    }
}

impl fmt::Debug for ImapCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImapCommand::Capability => f.write_str("CAPABILITY"),
            ImapCommand::StartTls => f.write_str("STARTTLS"),
            ImapCommand::Login(creds) => write!(f, "LOGIN {} [REDACTED]", creds.username),
            ImapCommand::Logout => f.write_str("LOGOUT"),
        }
    }
}

/// Maps a failed tagged LOGIN completion to a raw error.
///
/// A `NO` with text rejects the credentials; a bare `NO` says nothing.
pub fn login_failure(status: ImapStatus, text: &str) -> RawProbeError {
    match status {
        ImapStatus::No => RawProbeError::auth_rejected(text.trim()),
        _ => RawProbeError::protocol(format!("{:?} {}", status, text)),
    }
}
