//! Mock implementations for testing.
//!
//! Scripted probe connections, recording endpoints and a recording
//! background transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credentials;
use crate::config::ProbeConfig;
use crate::errors::{RouterError, RouterResult};
use crate::prober::{ConnectionEvent, Connector, ProbeConnection};
use crate::router::{BackgroundTransport, Endpoint, EndpointSender};
use crate::types::{ChannelId, ConnectionInfo, Envelope, Protocol};

/// One scripted connection event.
#[derive(Debug, Clone)]
pub struct Step {
    delay: Duration,
    event: ConnectionEvent,
}

impl Step {
    /// Emits `event` without waiting.
    pub fn now(event: ConnectionEvent) -> Self {
        Self::after(Duration::ZERO, event)
    }

    /// Emits `event` after `delay` from the previous step.
    pub fn after(delay: Duration, event: ConnectionEvent) -> Self {
        Self { delay, event }
    }
}

/// Connector whose connections replay a fixed script.
#[derive(Debug)]
pub struct ScriptedConnector {
    protocol: Protocol,
    script: Vec<Step>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    /// Creates a connector replaying `script` on every open.
    pub fn new(protocol: Protocol, script: Vec<Step>) -> Self {
        Self {
            protocol,
            script,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connections opened.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn open(
        &self,
        _credentials: &Credentials,
        _info: &ConnectionInfo,
        _config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedConnection {
            steps: self.script.iter().cloned().collect(),
            closed: self.closed.clone(),
        })
    }
}

/// Connection replaying a script. Yields `None` once the script is done.
#[derive(Debug)]
pub struct ScriptedConnection {
    steps: VecDeque<Step>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ProbeConnection for ScriptedConnection {
    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let step = self.steps.pop_front()?;
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        Some(step.event)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Endpoint that records everything it is handed.
#[derive(Debug)]
pub struct RecordingEndpoint {
    name: String,
    calls: Mutex<Vec<(ChannelId, String, Value)>>,
    disconnects: Mutex<Vec<Option<String>>>,
    shutdowns: AtomicUsize,
    sender: Mutex<Option<EndpointSender>>,
}

impl RecordingEndpoint {
    /// Creates a recording endpoint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            sender: Mutex::new(None),
        }
    }

    /// Messages processed so far, in order.
    pub fn calls(&self) -> Vec<(ChannelId, String, Value)> {
        self.calls.lock().clone()
    }

    /// Disconnect reasons received so far.
    pub fn disconnects(&self) -> Vec<Option<String>> {
        self.disconnects.lock().clone()
    }

    /// Number of shutdown calls.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Back-channel received at registration.
    pub fn sender(&self) -> Option<EndpointSender> {
        self.sender.lock().clone()
    }
}

impl Endpoint for RecordingEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_register(&self, sender: EndpointSender) {
        *self.sender.lock() = Some(sender);
    }

    fn process(&self, channel_id: ChannelId, command: &str, args: Value) {
        self.calls.lock().push((channel_id, command.to_string(), args));
    }

    fn on_disconnect(&self, reason: Option<&str>) {
        self.disconnects.lock().push(reason.map(str::to_string));
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Background transport that records posted envelopes.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    envelopes: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    /// Creates an open transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes posted so far, in order.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    /// Makes every later post fail with `TransportClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl BackgroundTransport for RecordingTransport {
    fn post(&self, envelope: Envelope) -> RouterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RouterError::TransportClosed);
        }
        self.envelopes.lock().push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_connection_replays_in_order() {
        let connector = ScriptedConnector::new(
            Protocol::Imap,
            vec![
                Step::now(ConnectionEvent::Connected),
                Step::after(Duration::from_secs(1), ConnectionEvent::Authenticated),
            ],
        );
        let mut connection =
            connector.open(&Credentials::new("u", "p"), &ConnectionInfo::plain("h", 143), &ProbeConfig::default());

        assert_eq!(connection.next_event().await, Some(ConnectionEvent::Connected));
        assert_eq!(connection.next_event().await, Some(ConnectionEvent::Authenticated));
        assert_eq!(connection.next_event().await, None);
        connection.close().await;
        assert_eq!(connector.opened_count(), 1);
        assert_eq!(connector.closed_count(), 1);
    }

    #[test]
    fn test_recording_transport_close() {
        let transport = RecordingTransport::new();
        transport
            .post(Envelope::new(ChannelId(1), "net", "x", json!(null)))
            .unwrap();
        transport.close();
        assert!(transport
            .post(Envelope::new(ChannelId(1), "net", "y", json!(null)))
            .is_err());
        assert_eq!(transport.envelopes().len(), 1);
    }
}
