//! Background context hosted on a tokio task.
//!
//! The worker shares nothing with the foreground: both sides exchange only
//! `serde_json::Value` messages over channels. When the task exits, panics
//! or is terminated the Router receives [`TransportEvent::Terminated`].

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::endpoint::{BackgroundTransport, TransportEvent};
use crate::errors::{RouterError, RouterResult};
use crate::types::Envelope;

/// Foreground-to-worker poster.
#[derive(Debug, Clone)]
pub struct WorkerTransport {
    tx: mpsc::UnboundedSender<Value>,
}

impl BackgroundTransport for WorkerTransport {
    fn post(&self, envelope: Envelope) -> RouterResult<()> {
        let value = serde_json::to_value(&envelope)?;
        self.tx.send(value).map_err(|_| RouterError::TransportClosed)
    }
}

/// The worker's side of the link.
#[derive(Debug)]
pub struct WorkerPort {
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<TransportEvent>,
}

impl WorkerPort {
    /// Waits for the next message from the foreground.
    ///
    /// Returns `None` once the foreground has dropped its transport.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Posts a raw message to the foreground Router.
    pub fn post(&self, message: Value) -> RouterResult<()> {
        self.outbound
            .send(TransportEvent::Message(message))
            .map_err(|_| RouterError::TransportClosed)
    }

    /// Posts an envelope to the foreground Router.
    pub fn post_envelope(&self, envelope: &Envelope) -> RouterResult<()> {
        self.post(serde_json::to_value(envelope)?)
    }
}

/// Owner handle for a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    transport: Arc<WorkerTransport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    worker: AbortHandle,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    /// Transport for constructing a Router bound to this worker.
    pub fn transport(&self) -> Arc<WorkerTransport> {
        self.transport.clone()
    }

    /// Takes the event stream for `Router::run`. Yields `Some` once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    /// Returns true while the worker task is running.
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stops the worker. The Router sees a `Terminated` event.
    pub fn terminate(&self) {
        self.worker.abort();
    }

    /// Waits until the termination event has been emitted.
    pub async fn join(self) {
        if let Err(e) = self.supervisor.await {
            tracing::warn!(error = %e, "worker supervisor failed");
        }
    }
}

/// Spawns `body` as an isolated background context.
///
/// Must be called from within a tokio runtime.
pub fn spawn_worker<F, Fut>(body: F) -> WorkerHandle
where
    F: FnOnce(WorkerPort) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (to_worker, inbound) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let port = WorkerPort {
        inbound,
        outbound: events_tx.clone(),
    };
    let worker = tokio::spawn(body(port));
    let abort = worker.abort_handle();

    let supervisor = tokio::spawn(async move {
        let reason = termination_reason(worker.await);
        match &reason {
            None => tracing::info!("background worker exited"),
            Some(reason) => tracing::warn!(reason = %reason, "background worker terminated"),
        }
        let _ = events_tx.send(TransportEvent::Terminated(reason));
    });

    WorkerHandle {
        transport: Arc::new(WorkerTransport { tx: to_worker }),
        events: Some(events_rx),
        worker: abort,
        supervisor,
    }
}

fn termination_reason(outcome: Result<(), JoinError>) -> Option<String> {
    match outcome {
        Ok(()) => None,
        Err(e) if e.is_cancelled() => Some("terminated".to_string()),
        Err(e) => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Some(format!("panicked: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelId;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_round_trip() {
        let mut handle = spawn_worker(|mut port| async move {
            while let Some(message) = port.recv().await {
                if port.post(message).is_err() {
                    break;
                }
            }
        });
        let mut events = handle.take_events().unwrap();
        assert!(handle.take_events().is_none());

        let envelope = Envelope::new(ChannelId(2), "maildb", "read", json!([1]));
        handle.transport().post(envelope).unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Message(value) => {
                assert_eq!(value["endpointName"], "maildb");
                assert_eq!(value["channelId"], 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_reports_terminated_without_reason() {
        let mut handle = spawn_worker(|port| async move {
            let _ = port.post(json!({"endpointName": "bridge", "command": "hello"}));
        });
        let mut events = handle.take_events().unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Message(_))));
        assert_eq!(events.recv().await, Some(TransportEvent::Terminated(None)));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut handle = spawn_worker(|_port| async move {
            panic!("sync engine crashed");
        });
        let mut events = handle.take_events().unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Terminated(Some(
                "panicked: sync engine crashed".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_terminate() {
        let mut handle = spawn_worker(|mut port| async move {
            while port.recv().await.is_some() {}
        });
        let mut events = handle.take_events().unwrap();
        assert!(handle.is_running());

        handle.terminate();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Terminated(Some("terminated".to_string())))
        );
        assert!(!handle.is_running());
    }
}
