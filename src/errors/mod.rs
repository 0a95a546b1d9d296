//! Error types for probing and routing.
//!
//! Probe failures are reduced to the closed [`ErrorKind`] set before they
//! leave the crate. Connectors report [`RawProbeError`] values, which only
//! the classifier inspects. Routing problems are [`RouterError`]
//! diagnostics: they are logged and counted, never raised to callers.

use std::fmt;
use std::io;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for router operations that can be inspected by the caller.
pub type RouterResult<T> = Result<T, RouterError>;

/// Result type for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Classified outcome of a failed probe.
///
/// This is the only failure information surfaced past the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// No terminal network event arrived before the probe timeout.
    UnresponsiveServer,
    /// The server rejected the supplied credentials.
    BadUserOrPass,
    /// The server's certificate or TLS setup could not be trusted.
    BadSecurity,
    /// The server failed in an authentication-adjacent way.
    ServerProblem,
    /// Anything else, including a connection that ended before login.
    Unknown,
}

impl ErrorKind {
    /// Returns the wire name of this kind (e.g. `bad-user-or-pass`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnresponsiveServer => "unresponsive-server",
            ErrorKind::BadUserOrPass => "bad-user-or-pass",
            ErrorKind::BadSecurity => "bad-security",
            ErrorKind::ServerProblem => "server-problem",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Parses a wire name back into a kind.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "unresponsive-server" => Some(ErrorKind::UnresponsiveServer),
            "bad-user-or-pass" => Some(ErrorKind::BadUserOrPass),
            "bad-security" => Some(ErrorKind::BadSecurity),
            "server-problem" => Some(ErrorKind::ServerProblem),
            "unknown" => Some(ErrorKind::Unknown),
            _ => None,
        }
    }

    /// Returns true if a later attempt could plausibly succeed without user action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::BadUserOrPass | ErrorKind::BadSecurity)
    }

    /// Returns true if this failure implies the server answered at all.
    pub fn server_reachable(&self) -> bool {
        !matches!(self, ErrorKind::UnresponsiveServer)
    }

    /// Returns true if the account owner has to fix something.
    pub fn should_report_problem(&self) -> bool {
        matches!(self, ErrorKind::BadUserOrPass)
    }

    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::UnresponsiveServer,
        ErrorKind::BadUserOrPass,
        ErrorKind::BadSecurity,
        ErrorKind::ServerProblem,
        ErrorKind::Unknown,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure reported by a protocol connection before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RawProbeError {
    /// The peer certificate was rejected (expired, not yet valid, untrusted).
    #[error("certificate not valid at this time: {reason}")]
    Certificate {
        /// Verifier explanation.
        reason: String,
    },

    /// TLS negotiation failed for a reason other than certificate validity.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the failure.
        message: String,
    },

    /// The server answered the login with a rejection.
    #[error("authentication rejected: {response}")]
    AuthRejected {
        /// Server response text, possibly empty.
        response: String,
    },

    /// No mutually supported authentication mechanism.
    #[error("no usable authentication method: {message}")]
    AuthUnsupported {
        /// Description of the mismatch.
        message: String,
    },

    /// The server violated the protocol or reported a failure mid-login.
    #[error("protocol error: {message}")]
    Protocol {
        /// Server response or parse failure.
        message: String,
    },

    /// An HTTP endpoint answered with a non-success status.
    #[error("HTTP status {status}")]
    HttpStatus {
        /// Status code.
        status: u16,
    },

    /// The network layer failed before the server could answer.
    #[error("network error ({kind:?}): {message}")]
    Network {
        /// I/O error kind.
        kind: io::ErrorKind,
        /// Description of the failure.
        message: String,
    },

    /// A lower layer gave up waiting on its own.
    #[error("timed out: {message}")]
    TimedOut {
        /// What was being waited for.
        message: String,
    },

    /// Collaborator error known only by its category name.
    #[error("{name}: {message}")]
    Named {
        /// Category name, e.g. `AuthError`.
        name: String,
        /// Description.
        message: String,
    },
}

impl RawProbeError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Creates an authentication rejection.
    pub fn auth_rejected(response: impl Into<String>) -> Self {
        Self::AuthRejected { response: response.into() }
    }

    /// Creates a named collaborator error.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut { message: message.into() }
    }

    /// Maps an I/O error from a socket operation.
    pub fn from_io(error: &io::Error) -> Self {
        #[cfg(feature = "rustls-tls")]
        {
            if let Some(tls) = error
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            {
                return Self::from_tls(tls);
            }
        }

        match error.kind() {
            io::ErrorKind::TimedOut => Self::timed_out(error.to_string()),
            kind => Self::Network {
                kind,
                message: error.to_string(),
            },
        }
    }

    /// Maps a rustls error raised during the handshake.
    #[cfg(feature = "rustls-tls")]
    pub fn from_tls(error: &rustls::Error) -> Self {
        match error {
            rustls::Error::InvalidCertificate(reason) => Self::Certificate {
                reason: format!("{:?}", reason),
            },
            other => Self::Tls {
                message: other.to_string(),
            },
        }
    }
}

/// Diagnostic raised while routing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// No endpoint is registered under the addressed name.
    #[error("no endpoint registered as '{name}'")]
    UnregisteredEndpoint {
        /// Addressed endpoint name.
        name: String,
    },

    /// Inbound message could not be interpreted as an envelope.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// What was wrong with it.
        reason: String,
    },

    /// An endpoint with this name is already registered.
    #[error("endpoint '{name}' is already registered")]
    DuplicateEndpoint {
        /// Conflicting name.
        name: String,
    },

    /// The background context is gone.
    #[error("background transport closed")]
    TransportClosed,

    /// An outbound payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl RouterError {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnregisteredEndpoint { .. } => "unregistered-endpoint",
            Self::MalformedMessage { .. } => "malformed-message",
            Self::DuplicateEndpoint { .. } => "duplicate-endpoint",
            Self::TransportClosed => "transport-closed",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {message}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Parse failure.
        message: String,
    },

    /// A referenced file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    /// Creates an invalid-configuration error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
