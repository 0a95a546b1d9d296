//! # Mail Bridge Integration Library
//!
//! Account validation and cross-context messaging for a mail client:
//! - Credential probing over IMAP, POP3, SMTP and ActiveSync
//! - Implicit TLS and STARTTLS with certificate failure detection
//! - A closed error taxonomy with a single classifier
//! - A router multiplexing named endpoints over one background link
//! - A handshake-gated primary channel and a connectivity side channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mailbridge::{probe, ConnectionInfo, Credentials, ProbeConfig, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProbeConfig::builder()
//!         .connect_timeout(std::time::Duration::from_secs(30))
//!         .build()?;
//!
//!     let result = probe(
//!         Protocol::Smtp,
//!         Credentials::new("user@example.com", "password"),
//!         ConnectionInfo::starttls("smtp.example.com", 587),
//!         &config,
//!     )
//!     .await;
//!
//!     match result.error {
//!         None => println!("login ok"),
//!         Some(kind) => println!("login failed: {}", kind),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Probing
pub mod auth;
pub mod classifier;
pub mod protocol;
pub mod prober;
pub mod transport;

// Cross-context routing
pub mod router;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use classifier::classify;
pub use config::{ProbeConfig, ProbeConfigBuilder, RouterConfig, RouterConfigBuilder, TlsOptions};
pub use errors::{ConfigError, ErrorKind, RawProbeError, RouterError, RouterResult};
pub use types::{ChannelId, ConnectionInfo, Credentials, Envelope, ProbeResult, Protocol};
pub use auth::AuthMethod;
pub use prober::{probe, ConnectionEvent, Connector, ProbeConnection, ProbeHandle, Prober};
pub use router::{
    BackgroundTransport, ControlEndpoint, Endpoint, EndpointSender, PrimaryChannel, Router,
    TransportEvent,
};
pub use observability::{init_logging, LoggingConfig, ProbeMetrics, RouterMetrics};
