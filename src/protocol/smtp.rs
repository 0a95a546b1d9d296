//! SMTP (RFC 5321) commands and replies needed to authenticate.

use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::RawProbeError;

/// SMTP commands issued by a probe.
#[derive(Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: AuthMethod,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// Continuation line of a SASL exchange.
    AuthContinue(String),
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {}", mechanism, response),
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {}", mechanism),
            SmtpCommand::AuthContinue(data) => data.clone(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }
}

// SASL payloads carry credentials; keep them out of logs.
impl fmt::Debug for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth { mechanism, .. } => write!(f, "AUTH {} [REDACTED]", mechanism),
            SmtpCommand::AuthContinue(_) => f.write_str("[REDACTED]"),
            other => f.write_str(&other.to_smtp_string()),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Status code (e.g., 220, 235, 535).
    pub code: u16,
    /// Reply text lines.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
        }
    }

    /// Returns true if `line` continues a multiline reply (`250-...`).
    pub fn is_continuation(line: &str) -> bool {
        line.as_bytes().get(3) == Some(&b'-')
    }

    /// Parses a reply from its raw lines.
    pub fn parse(lines: &[String]) -> Result<Self, RawProbeError> {
        if lines.is_empty() {
            return Err(RawProbeError::protocol("empty SMTP reply"));
        }

        let mut code = 0u16;
        let mut messages = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let parsed: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| RawProbeError::protocol(format!("invalid SMTP reply: {}", line)))?;

            if i == 0 {
                code = parsed;
            } else if parsed != code {
                return Err(RawProbeError::protocol("inconsistent codes in multiline reply"));
            }

            messages.push(line.get(4..).unwrap_or("").to_string());
        }

        Ok(Self { code, message: messages })
    }

    /// Returns true if this is a success reply (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Converts a failed authentication reply to a raw error.
    ///
    /// 535 and 534 reject the credentials; anything else is the server's fault.
    pub fn to_auth_error(&self) -> RawProbeError {
        match self.code {
            codes::AUTH_FAILED | codes::AUTH_MECHANISM_TOO_WEAK => {
                RawProbeError::auth_rejected(self.to_string())
            }
            _ => RawProbeError::protocol(self.to_string()),
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP extensions relevant to logging in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsmtpCapabilities {
    /// Supported authentication mechanisms, in advertised order.
    pub auth_mechanisms: Vec<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        // The first line is the server's greeting, not a capability.
        for line in response.message.iter().skip(1) {
            let line = line.trim().to_ascii_uppercase();
            let mut parts = line.split(|c: char| c == ' ' || c == '=');
            match parts.next() {
                Some("AUTH") => {
                    for method in parts.filter_map(AuthMethod::from_capability) {
                        if !caps.auth_mechanisms.contains(&method) {
                            caps.auth_mechanisms.push(method);
                        }
                    }
                }
                Some("STARTTLS") => caps.starttls = true,
                _ => {}
            }
        }

        caps
    }
}

/// Reply codes used during login.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Authentication mechanism too weak.
    pub const AUTH_MECHANISM_TOO_WEAK: u16 = 534;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(SmtpCommand::Ehlo("localhost".into()).to_smtp_string(), "EHLO localhost");
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        let auth = SmtpCommand::Auth {
            mechanism: AuthMethod::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".into()),
        };
        assert_eq!(auth.to_smtp_string(), "AUTH PLAIN AHVzZXIAcGFzcw==");
        assert!(!format!("{:?}", auth).contains("AHVzZXIAcGFzcw"));
    }

    #[test]
    fn test_response_parse() {
        let response = SmtpResponse::parse(&lines(&["235 2.7.0 Authentication successful"])).unwrap();
        assert_eq!(response.code, 235);
        assert!(response.is_success());

        let response = SmtpResponse::parse(&lines(&[
            "250-smtp.example.com Hello",
            "250-SIZE 10485760",
            "250 STARTTLS",
        ]))
        .unwrap();
        assert_eq!(response.message.len(), 3);

        assert!(SmtpResponse::parse(&lines(&["2x0 nope"])).is_err());
        assert!(SmtpResponse::parse(&lines(&["250-a", "251 b"])).is_err());
    }

    #[test]
    fn test_continuation_detection() {
        assert!(SmtpResponse::is_continuation("250-SIZE 1000"));
        assert!(!SmtpResponse::is_continuation("250 OK"));
        assert!(!SmtpResponse::is_continuation("25"));
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse::parse(&lines(&[
            "250-smtp.example.com",
            "250-SIZE 10485760",
            "250-AUTH PLAIN LOGIN CRAM-MD5 XOAUTH2",
            "250-AUTH=LOGIN",
            "250 STARTTLS",
        ]))
        .unwrap();

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert_eq!(
            caps.auth_mechanisms,
            vec![AuthMethod::Plain, AuthMethod::Login, AuthMethod::CramMd5]
        );
        assert!(caps.starttls);
    }

    #[test]
    fn test_auth_error_mapping() {
        let rejected = SmtpResponse::new(535, "5.7.8 Username and Password not accepted");
        assert!(matches!(rejected.to_auth_error(), RawProbeError::AuthRejected { .. }));

        let broken = SmtpResponse::new(454, "4.7.0 Temporary authentication failure");
        assert!(matches!(broken.to_auth_error(), RawProbeError::Protocol { .. }));
    }
}
