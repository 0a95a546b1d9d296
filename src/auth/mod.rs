//! Credentials and login mechanisms used while probing.
//!
//! Supports the SASL mechanisms a probe may need on SMTP:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//! - CRAM-MD5 (RFC 2195)
//!
//! IMAP and POP3 probes log in with plain commands; IMAP needs
//! [`imap_quote`] for its string arguments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RawProbeError;

/// Account credentials. Immutable and never logged in full.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Username, usually the email address.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// SASL mechanisms a probe can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
}

impl AuthMethod {
    /// Returns the SASL mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
        }
    }

    /// Returns the priority for auto-selection (higher is better).
    pub fn priority(&self) -> u8 {
        match self {
            AuthMethod::CramMd5 => 3,
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
        }
    }

    /// Parses a mechanism name from a capability list.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mechanism_name())
    }
}

/// Builds mechanism responses.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // \0username\0password
        let response = format!(
            "\0{}\0{}",
            credentials.username,
            credentials.password.expose_secret()
        );
        BASE64.encode(response)
    }

    /// Generates the LOGIN username response.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(&credentials.username)
    }

    /// Generates the LOGIN password response.
    pub fn login_password(credentials: &Credentials) -> String {
        BASE64.encode(credentials.password.expose_secret())
    }

    /// Generates the CRAM-MD5 response to a base64 challenge.
    pub fn cram_md5_response(challenge: &str, credentials: &Credentials) -> Result<String, RawProbeError> {
        let challenge_bytes = BASE64
            .decode(challenge.trim())
            .map_err(|e| RawProbeError::protocol(format!("invalid CRAM-MD5 challenge: {}", e)))?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(credentials.password.expose_secret().as_bytes())
            .map_err(|e| RawProbeError::protocol(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", credentials.username, hex_digest)))
    }

    /// Picks the strongest advertised mechanism.
    pub fn select_best_method(available: &[AuthMethod]) -> Result<AuthMethod, RawProbeError> {
        available
            .iter()
            .copied()
            .max_by_key(AuthMethod::priority)
            .ok_or_else(|| RawProbeError::AuthUnsupported {
                message: "server advertises none of CRAM-MD5, PLAIN, LOGIN".to_string(),
            })
    }
}

/// Quotes a string for use as an IMAP command argument.
pub fn imap_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_from_capability() {
        assert_eq!(AuthMethod::from_capability("PLAIN"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_capability("login"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_capability("CRAM-MD5"), Some(AuthMethod::CramMd5));
        assert_eq!(AuthMethod::from_capability("XOAUTH2"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let creds = Credentials::new("user", "password");
        let decoded = BASE64.decode(Authenticator::plain_initial_response(&creds)).unwrap();
        assert_eq!(decoded, b"\0user\0password");
    }

    #[test]
    fn test_cram_md5_response() {
        // RFC 2195 example
        let creds = Credentials::new("tim", "tanstaaftanstaaf");
        let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
        let response = Authenticator::cram_md5_response(&challenge, &creds).unwrap();
        let decoded = String::from_utf8(BASE64.decode(response).unwrap()).unwrap();
        assert_eq!(decoded, "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_cram_md5_rejects_garbage_challenge() {
        let creds = Credentials::new("tim", "x");
        let err = Authenticator::cram_md5_response("!!not base64!!", &creds).unwrap_err();
        assert!(matches!(err, RawProbeError::Protocol { .. }));
    }

    #[test]
    fn test_select_best_method() {
        let method =
            Authenticator::select_best_method(&[AuthMethod::Login, AuthMethod::Plain]).unwrap();
        assert_eq!(method, AuthMethod::Plain);

        let method = Authenticator::select_best_method(&[
            AuthMethod::Plain,
            AuthMethod::CramMd5,
            AuthMethod::Login,
        ])
        .unwrap();
        assert_eq!(method, AuthMethod::CramMd5);

        let err = Authenticator::select_best_method(&[]).unwrap_err();
        assert!(matches!(err, RawProbeError::AuthUnsupported { .. }));
    }

    #[test]
    fn test_imap_quote() {
        assert_eq!(imap_quote("user@example.com"), "\"user@example.com\"");
        assert_eq!(imap_quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn test_credentials_debug() {
        let creds = Credentials::new("user", "secret_password");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_password"));
    }
}
