//! Credential probing.
//!
//! A [`Prober`] opens one connection through a [`Connector`], races it
//! against the configured timeout and delivers exactly one
//! [`ProbeResult`]. The connection is closed once the result is settled,
//! whatever the outcome, and any later connection events are never read.
//!
//! ```rust,no_run
//! use integrations_mailbridge::{probe, ConnectionInfo, Credentials, ProbeConfig, Protocol};
//!
//! # async fn run() {
//! let result = probe(
//!     Protocol::Imap,
//!     Credentials::new("me@example.com", "hunter2"),
//!     ConnectionInfo::secure("imap.example.com", 993),
//!     &ProbeConfig::default(),
//! )
//! .await;
//!
//! match result.error {
//!     None => println!("credentials accepted"),
//!     Some(kind) => println!("probe failed: {}", kind),
//! }
//! # }
//! ```

mod activesync;
mod imap;
mod pop3;
mod session;
mod smtp;

pub use activesync::ActiveSyncConnector;
pub use imap::ImapConnector;
pub use pop3::Pop3Connector;
pub use smtp::SmtpConnector;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};

use crate::auth::Credentials;
use crate::classifier::classify;
use crate::config::{ProbeConfig, MAX_CONNECT_TIMEOUT};
use crate::errors::{ErrorKind, RawProbeError};
use crate::observability::ProbeMetrics;
use crate::types::{ConnectionInfo, Protocol, ProbeResult};

/// Event emitted by an underlying protocol connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport is up. Not terminal.
    Connected,
    /// Credentials were accepted.
    Authenticated,
    /// The connection failed.
    Error(RawProbeError),
    /// The connection ended without authenticating.
    End,
}

/// An in-progress protocol connection, seen as a stream of events.
#[async_trait]
pub trait ProbeConnection: Send {
    /// Waits for the next event. `None` means the stream is exhausted.
    async fn next_event(&mut self) -> Option<ConnectionEvent>;

    /// Releases the connection. Called exactly once per probe.
    async fn close(&mut self);
}

/// Creates protocol connections. The connection attempt starts inside `open`.
pub trait Connector: Send + Sync {
    /// Protocol spoken by the connections this connector opens.
    fn protocol(&self) -> Protocol;

    /// Starts a connection attempt.
    fn open(
        &self,
        credentials: &Credentials,
        info: &ConnectionInfo,
        config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection>;
}

/// Returns the built-in connector for a protocol.
pub fn connector_for(protocol: Protocol) -> Arc<dyn Connector> {
    match protocol {
        Protocol::Imap => Arc::new(ImapConnector),
        Protocol::Pop3 => Arc::new(Pop3Connector),
        Protocol::Smtp => Arc::new(SmtpConnector),
        Protocol::ActiveSync => Arc::new(ActiveSyncConnector),
    }
}

/// Probes an account with the built-in connector for `protocol`.
pub async fn probe(
    protocol: Protocol,
    credentials: Credentials,
    info: ConnectionInfo,
    config: &ProbeConfig,
) -> ProbeResult {
    Prober::new(connector_for(protocol), config.clone())
        .start(credentials, info)
        .result()
        .await
}

/// One-shot destination for a probe's result.
///
/// Settling consumes the slot, so a second delivery cannot be expressed.
struct ResultSlot {
    deliver: Box<dyn FnOnce(ProbeResult) + Send>,
}

impl ResultSlot {
    fn new(deliver: impl FnOnce(ProbeResult) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(deliver),
        }
    }

    fn settle(self, result: ProbeResult) {
        (self.deliver)(result)
    }
}

/// How a probe ended.
enum Outcome {
    Authenticated,
    Failed(RawProbeError),
    Ended,
    TimedOut,
}

/// Starts probes for one protocol.
#[derive(Clone)]
pub struct Prober {
    connector: Arc<dyn Connector>,
    config: ProbeConfig,
    metrics: Option<Arc<ProbeMetrics>>,
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("protocol", &self.connector.protocol())
            .field("connect_timeout", &self.config.connect_timeout)
            .finish()
    }
}

impl Prober {
    /// Creates a prober.
    pub fn new(connector: Arc<dyn Connector>, config: ProbeConfig) -> Self {
        Self {
            connector,
            config,
            metrics: None,
        }
    }

    /// Records outcomes into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ProbeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the probe timeout.
    pub fn timeout(&self) -> Duration {
        self.config.connect_timeout
    }

    /// Starts a probe and returns a handle to its result.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, credentials: Credentials, info: ConnectionInfo) -> ProbeHandle {
        let (tx, rx) = oneshot::channel();
        let protocol = self.connector.protocol();
        let server_host = info.hostname.clone();
        self.start_with_callback(credentials, info, move |result| {
            let _ = tx.send(result);
        });
        ProbeHandle {
            rx,
            protocol,
            server_host,
        }
    }

    /// Starts a probe, invoking `on_result` exactly once.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_with_callback<F>(&self, credentials: Credentials, info: ConnectionInfo, on_result: F)
    where
        F: FnOnce(ProbeResult) + Send + 'static,
    {
        let protocol = self.connector.protocol();
        let timeout = self.config.connect_timeout;
        let metrics = self.metrics.clone();
        let slot = ResultSlot::new(on_result);

        if let Some(metrics) = &metrics {
            metrics.record_attempt();
        }
        tracing::debug!(
            protocol = %protocol,
            server = %info.address(),
            username = %credentials.username,
            timeout_ms = timeout.as_millis() as u64,
            "starting probe"
        );

        let started = Instant::now();
        // Unvalidated configs may carry a timeout past what Instant can hold.
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + MAX_CONNECT_TIMEOUT);
        let connection = self.connector.open(&credentials, &info, &self.config);

        tokio::spawn(async move {
            let mut connection = connection;
            let outcome = tokio::select! {
                outcome = next_terminal(connection.as_mut()) => outcome,
                _ = sleep_until(deadline) => Outcome::TimedOut,
            };

            let mut result = match &outcome {
                Outcome::Authenticated => ProbeResult::success(protocol, &info.hostname),
                Outcome::Failed(raw) => {
                    let kind = classify(raw);
                    tracing::debug!(protocol = %protocol, error = %raw, kind = %kind, "probe error");
                    ProbeResult::failure(protocol, &info.hostname, kind)
                }
                Outcome::Ended => ProbeResult::failure(protocol, &info.hostname, ErrorKind::Unknown),
                Outcome::TimedOut => {
                    ProbeResult::failure(protocol, &info.hostname, ErrorKind::UnresponsiveServer)
                }
            };
            result.elapsed = started.elapsed();

            match result.error {
                None => tracing::info!(
                    protocol = %protocol,
                    server = %info.hostname,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "probe succeeded"
                ),
                Some(kind) => tracing::info!(
                    protocol = %protocol,
                    server = %info.hostname,
                    error = %kind,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "probe failed"
                ),
            }
            if let Some(metrics) = &metrics {
                metrics.record_result(&result, matches!(outcome, Outcome::TimedOut));
            }

            slot.settle(result);
            connection.close().await;
        });
    }
}

async fn next_terminal(connection: &mut dyn ProbeConnection) -> Outcome {
    loop {
        match connection.next_event().await {
            Some(ConnectionEvent::Connected) => continue,
            Some(ConnectionEvent::Authenticated) => return Outcome::Authenticated,
            Some(ConnectionEvent::Error(raw)) => return Outcome::Failed(raw),
            Some(ConnectionEvent::End) | None => return Outcome::Ended,
        }
    }
}

/// Handle to a running probe.
#[derive(Debug)]
pub struct ProbeHandle {
    rx: oneshot::Receiver<ProbeResult>,
    protocol: Protocol,
    server_host: String,
}

impl ProbeHandle {
    /// Waits for the probe's single result.
    pub async fn result(self) -> ProbeResult {
        match self.rx.await {
            Ok(result) => result,
            // The probe task died before settling.
            Err(_) => ProbeResult::failure(self.protocol, self.server_host, ErrorKind::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ScriptedConnector, Step};
    use std::sync::Mutex;

    fn creds() -> Credentials {
        Credentials::new("user@example.com", "secret")
    }

    fn info() -> ConnectionInfo {
        ConnectionInfo::secure("mail.example.com", 993)
    }

    fn prober(connector: &Arc<ScriptedConnector>) -> Prober {
        Prober::new(connector.clone(), ProbeConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticated_is_success() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Imap,
            vec![
                Step::after(Duration::from_millis(50), ConnectionEvent::Connected),
                Step::after(Duration::from_millis(50), ConnectionEvent::Authenticated),
            ],
        ));

        let result = prober(&connector).start(creds(), info()).result().await;
        assert!(result.is_success());
        assert_eq!(result.server_host, "mail.example.com");
        assert_eq!(result.protocol, Protocol::Imap);
        assert!(result.elapsed >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_classified() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Smtp,
            vec![Step::now(ConnectionEvent::Error(RawProbeError::named("AuthError", "535")))],
        ));

        let result = prober(&connector).start(creds(), info()).result().await;
        assert_eq!(result.error, Some(ErrorKind::BadUserOrPass));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_without_login_is_unknown() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Imap,
            vec![Step::now(ConnectionEvent::Connected), Step::now(ConnectionEvent::End)],
        ));

        let result = prober(&connector).start(creds(), info()).result().await;
        assert_eq!(result.error, Some(ErrorKind::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_stream_is_unknown() {
        let connector = Arc::new(ScriptedConnector::new(Protocol::Pop3, vec![]));
        let result = prober(&connector).start(creds(), info()).result().await;
        assert_eq!(result.error, Some(ErrorKind::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wins_when_nothing_happens() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Smtp,
            vec![Step::after(Duration::from_secs(35), ConnectionEvent::Authenticated)],
        ));

        let result = prober(&connector).start(creds(), info()).result().await;
        assert_eq!(result.error, Some(ErrorKind::UnresponsiveServer));
        assert!(result.elapsed >= Duration::from_millis(30_000));
        assert_eq!(connector.closed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_fires_once_and_connection_closes() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Imap,
            vec![
                Step::now(ConnectionEvent::Authenticated),
                Step::now(ConnectionEvent::Error(RawProbeError::timed_out("late"))),
                Step::now(ConnectionEvent::End),
            ],
        ));

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        prober(&connector).start_with_callback(creds(), info(), move |r| {
            sink.lock().unwrap().push(r);
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        assert_eq!(connector.closed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_panic() {
        let connector = Arc::new(ScriptedConnector::new(
            Protocol::Smtp,
            vec![Step::after(Duration::from_secs(1), ConnectionEvent::Authenticated)],
        ));
        let config = ProbeConfig {
            connect_timeout: Duration::from_secs(u64::MAX),
            ..ProbeConfig::default()
        };

        let result = Prober::new(connector.clone(), config)
            .start(creds(), info())
            .result()
            .await;
        assert!(result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_are_recorded() {
        let metrics = Arc::new(ProbeMetrics::new());
        let connector = Arc::new(ScriptedConnector::new(Protocol::Smtp, vec![]));
        let prober = prober(&connector).with_metrics(metrics.clone());

        prober.start(creds(), info()).result().await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.failures_for(ErrorKind::Unknown), 1);
        assert_eq!(snapshot.timeouts, 0);
    }
}
