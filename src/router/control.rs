//! Connectivity side channel.
//!
//! Reports online/offline edges of the host environment to the background
//! context, independent of the primary channel's buffering.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::endpoint::{Endpoint, EndpointSender};
use crate::types::ChannelId;

/// Control endpoint fed by a connectivity watch.
///
/// The first message from the background is answered with `hello [online]`;
/// after that each transition is pushed as `online [true]` or
/// `offline [false]`. Later messages get no reply.
pub struct ControlEndpoint {
    name: String,
    online: watch::Receiver<bool>,
    sender: Mutex<Option<EndpointSender>>,
    greeted: AtomicBool,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ControlEndpoint {
    /// Creates a control endpoint registered under `name`.
    pub fn new(name: impl Into<String>, online: watch::Receiver<bool>) -> Self {
        Self {
            name: name.into(),
            online,
            sender: Mutex::new(None),
            greeted: AtomicBool::new(false),
            forwarder: Mutex::new(None),
        }
    }

    /// Returns true once edge forwarding has started.
    pub fn is_forwarding(&self) -> bool {
        self.forwarder.lock().is_some()
    }

    fn start_forwarder(&self, sender: EndpointSender, channel_id: ChannelId, initial: bool) {
        let mut forwarder = self.forwarder.lock();
        if forwarder.is_some() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(endpoint = %self.name, "no runtime; connectivity edges will not be forwarded");
                return;
            }
        };

        let mut online = self.online.clone();
        *forwarder = Some(runtime.spawn(async move {
            let mut last = initial;
            while online.changed().await.is_ok() {
                let now = *online.borrow_and_update();
                if now == last {
                    continue;
                }
                last = now;
                let command = if now { "online" } else { "offline" };
                if let Err(e) = sender.send(channel_id, command, json!([now])) {
                    tracing::warn!(code = e.code(), error = %e, "connectivity edge not delivered");
                    break;
                }
                tracing::debug!(online = now, "connectivity edge forwarded");
            }
        }));
    }
}

impl Endpoint for ControlEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_register(&self, sender: EndpointSender) {
        *self.sender.lock() = Some(sender);
    }

    fn process(&self, channel_id: ChannelId, command: &str, args: Value) {
        let _ = args;
        let Some(sender) = self.sender.lock().clone() else {
            tracing::warn!(endpoint = %self.name, command, "control message before registration");
            return;
        };

        if self.greeted.swap(true, Ordering::AcqRel) {
            tracing::debug!(endpoint = %self.name, command, "control already answered");
            return;
        }

        let online = *self.online.borrow();
        if let Err(e) = sender.send(channel_id, "hello", json!([online])) {
            tracing::warn!(code = e.code(), error = %e, "control hello not delivered");
            self.greeted.store(false, Ordering::Release);
            return;
        }
        self.start_forwarder(sender, channel_id, online);
    }

    fn shutdown(&self) {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingTransport;
    use crate::observability::RouterMetrics;
    use std::sync::Arc;
    use std::time::Duration;

    fn registered(online: bool) -> (ControlEndpoint, watch::Sender<bool>, Arc<RecordingTransport>) {
        let (tx, rx) = watch::channel(online);
        let transport = Arc::new(RecordingTransport::new());
        let endpoint = ControlEndpoint::new("control", rx);
        endpoint.on_register(EndpointSender::new(
            "control",
            transport.clone(),
            Arc::new(RouterMetrics::new()),
        ));
        (endpoint, tx, transport)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_first_message_answers_hello() {
        let (endpoint, _tx, transport) = registered(true);
        endpoint.process(ChannelId(4), "hello", Value::Null);

        let sent = transport.envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].endpoint_name, "control");
        assert_eq!(sent[0].command, "hello");
        assert_eq!(sent[0].args, json!([true]));
        assert_eq!(sent[0].channel_id, ChannelId(4));
        assert!(endpoint.is_forwarding());
    }

    #[tokio::test]
    async fn test_only_real_edges_are_sent() {
        let (endpoint, tx, transport) = registered(true);
        endpoint.process(ChannelId(1), "hello", Value::Null);

        tx.send(true).unwrap();
        settle().await;
        tx.send(false).unwrap();
        settle().await;
        tx.send(false).unwrap();
        settle().await;
        tx.send(true).unwrap();
        settle().await;

        let commands: Vec<(String, Value)> = transport
            .envelopes()
            .into_iter()
            .map(|e| (e.command, e.args))
            .collect();
        assert_eq!(
            commands,
            vec![
                ("hello".to_string(), json!([true])),
                ("offline".to_string(), json!([false])),
                ("online".to_string(), json!([true])),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeat_request_is_answered_once() {
        let (endpoint, tx, transport) = registered(false);
        endpoint.process(ChannelId(1), "hello", Value::Null);
        endpoint.process(ChannelId(1), "hello", Value::Null);
        endpoint.process(ChannelId(1), "status", json!(["again"]));

        tx.send(true).unwrap();
        settle().await;

        let commands: Vec<String> = transport.envelopes().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["hello".to_string(), "online".to_string()]);
    }

    #[tokio::test]
    async fn test_undelivered_hello_starts_no_forwarder() {
        let (endpoint, _tx, transport) = registered(true);
        transport.close();
        endpoint.process(ChannelId(1), "hello", Value::Null);
        assert!(!endpoint.is_forwarding());
    }

    #[tokio::test]
    async fn test_shutdown_stops_forwarding() {
        let (endpoint, tx, transport) = registered(true);
        endpoint.process(ChannelId(1), "hello", Value::Null);
        endpoint.shutdown();
        settle().await;

        let _ = tx.send(false);
        settle().await;
        assert_eq!(transport.envelopes().len(), 1);
        assert!(!endpoint.is_forwarding());
    }
}
