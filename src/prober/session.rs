//! Drives a protocol login in its own task and exposes it as a
//! [`ProbeConnection`] event stream.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{ConnectionEvent, ProbeConnection};
use crate::errors::RawProbeError;
use crate::transport::LineTransport;

/// Why a login stopped short of success.
#[derive(Debug)]
pub(crate) enum Interrupted {
    /// The peer closed the connection cleanly.
    Ended,
    /// Something failed.
    Failed(RawProbeError),
}

impl From<RawProbeError> for Interrupted {
    fn from(error: RawProbeError) -> Self {
        Interrupted::Failed(error)
    }
}

impl Interrupted {
    fn into_event(self) -> ConnectionEvent {
        match self {
            Interrupted::Ended => ConnectionEvent::End,
            Interrupted::Failed(error) => ConnectionEvent::Error(error),
        }
    }
}

/// Reads one line, treating a clean close as [`Interrupted::Ended`].
pub(crate) async fn expect_line(transport: &mut LineTransport) -> Result<String, Interrupted> {
    transport.read_line().await?.ok_or(Interrupted::Ended)
}

/// One login attempt over some connection.
#[async_trait]
pub(crate) trait LoginSession: Send + 'static {
    /// Connects and authenticates.
    async fn login(&mut self) -> Result<(), Interrupted>;

    /// Says goodbye and releases the connection.
    async fn logout(&mut self);
}

/// Event stream backed by a spawned login task.
pub(crate) struct SessionConnection {
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    close_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl SessionConnection {
    /// Spawns the login immediately.
    pub(crate) fn spawn<S: LoginSession>(mut session: S) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let driver = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = &mut close_rx => None,
                result = session.login() => Some(result),
            };

            if let Some(result) = outcome {
                let event = match result {
                    Ok(()) => ConnectionEvent::Authenticated,
                    Err(interrupted) => interrupted.into_event(),
                };
                let _ = event_tx.send(event);
                // Hold the connection until the prober lets go of it.
                let _ = close_rx.await;
            }

            session.logout().await;
        });

        Self {
            events,
            close_tx: Some(close_tx),
            driver: Some(driver),
        }
    }
}

#[async_trait]
impl ProbeConnection for SessionConnection {
    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "probe session task failed");
            }
        }
    }
}
