//! Core types shared by the prober and the router.
//!
//! This module provides:
//! - Probe inputs ([`ConnectionInfo`], [`Protocol`], [`Credentials`])
//! - The terminal [`ProbeResult`]
//! - The cross-context message [`Envelope`] and its [`ChannelId`]

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

pub use crate::auth::Credentials;

/// Mail protocol a probe speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// IMAP4rev1 incoming mail.
    Imap,
    /// POP3 incoming mail.
    Pop3,
    /// SMTP submission.
    Smtp,
    /// Exchange ActiveSync over HTTPS.
    ActiveSync,
}

impl Protocol {
    /// Returns the lowercase protocol name.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
            Protocol::Smtp => "smtp",
            Protocol::ActiveSync => "activesync",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where and how to connect. Immutable once handed to a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Server hostname.
    pub hostname: String,
    /// Server port.
    pub port: u16,
    /// Use implicit TLS from the first byte.
    #[serde(default)]
    pub use_crypto: bool,
    /// Never negotiate STARTTLS, even when offered.
    #[serde(default, rename = "ignoreTLS")]
    pub ignore_tls: bool,
}

impl ConnectionInfo {
    /// Creates connection info with implicit TLS.
    pub fn secure(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            use_crypto: true,
            ignore_tls: false,
        }
    }

    /// Creates plaintext connection info that may upgrade with STARTTLS.
    pub fn starttls(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            use_crypto: false,
            ignore_tls: false,
        }
    }

    /// Creates plaintext connection info that never upgrades.
    pub fn plain(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            use_crypto: false,
            ignore_tls: true,
        }
    }

    /// Returns `host:port` for display, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Returns true if STARTTLS should be attempted when offered.
    pub fn wants_starttls(&self) -> bool {
        !self.use_crypto && !self.ignore_tls
    }
}

/// Terminal outcome of one probe. Produced at most once per probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Classified failure, or `None` on success.
    pub error: Option<ErrorKind>,
    /// Host that was probed.
    pub server_host: String,
    /// Protocol that was probed.
    pub protocol: Protocol,
    /// Time from start to the terminal event.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ProbeResult {
    /// Creates a successful result.
    pub fn success(protocol: Protocol, server_host: impl Into<String>) -> Self {
        Self {
            error: None,
            server_host: server_host.into(),
            protocol,
            elapsed: Duration::ZERO,
        }
    }

    /// Creates a failed result.
    pub fn failure(protocol: Protocol, server_host: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            error: Some(kind),
            server_host: server_host.into(),
            protocol,
            elapsed: Duration::ZERO,
        }
    }

    /// Returns true if the credentials were accepted.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Correlation id of a logical channel to the background context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Message exchanged with the background context.
///
/// Wire shape: `{ channelId, endpointName, command, args }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Channel the message belongs to.
    #[serde(default)]
    pub channel_id: ChannelId,
    /// Endpoint the message is addressed to.
    pub endpoint_name: String,
    /// Command name.
    #[serde(default)]
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(
        channel_id: ChannelId,
        endpoint_name: impl Into<String>,
        command: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            channel_id,
            endpoint_name: endpoint_name.into(),
            command: command.into(),
            args,
        }
    }
}
