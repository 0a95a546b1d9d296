//! Cross-context message router.
//!
//! The [`Router`] owns one logical link to a background context. It
//! dispatches inbound envelopes to named [`Endpoint`]s, gates the primary
//! ("bridge") channel behind a `hello` handshake, and fans transport loss
//! out to every endpoint as a disconnect notification.
//!
//! Nothing here suspends except [`Router::run`], which only waits for the
//! next transport event. Routing problems are logged and counted, never
//! raised to the sender of the message.

mod bridge;
mod control;
mod endpoint;
mod registry;
pub mod worker;

pub use bridge::{ChannelState, PrimaryChannel, HELLO, MESSAGE};
pub use control::ControlEndpoint;
pub use endpoint::{BackgroundTransport, Endpoint, EndpointSender, TransportEvent};
pub use registry::EndpointRegistry;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::config::RouterConfig;
use crate::errors::{RouterError, RouterResult};
use crate::observability::RouterMetrics;
use crate::types::{ChannelId, Envelope};
use bridge::BridgeShared;

/// Well-known endpoint names.
pub mod names {
    /// Online/offline signaling.
    pub const CONTROL: &str = "control";
    /// Primary application channel.
    pub const BRIDGE: &str = "bridge";
    /// Account configuration parsing.
    pub const CONFIGPARSER: &str = "configparser";
    /// Scheduled synchronization.
    pub const CRONSYNC: &str = "cronsync";
    /// Device storage access.
    pub const DEVICESTORAGE: &str = "devicestorage";
    /// Persistent mail database.
    pub const MAILDB: &str = "maildb";
    /// Networking.
    pub const NET: &str = "net";
    /// Wake locks.
    pub const WAKELOCKS: &str = "wakelocks";

    /// All well-known names.
    pub const ALL: [&str; 8] = [
        CONTROL,
        BRIDGE,
        CONFIGPARSER,
        CRONSYNC,
        DEVICESTORAGE,
        MAILDB,
        NET,
        WAKELOCKS,
    ];
}

/// Router for one background context.
pub struct Router {
    config: RouterConfig,
    transport: Arc<dyn BackgroundTransport>,
    registry: EndpointRegistry,
    metrics: Arc<RouterMetrics>,
    next_channel: AtomicU64,
    primary: Mutex<Option<Arc<BridgeShared>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("endpoints", &self.registry.names())
            .finish()
    }
}

impl Router {
    /// Creates a router posting to `transport`.
    pub fn new(transport: Arc<dyn BackgroundTransport>, config: RouterConfig) -> Self {
        Self {
            config,
            transport,
            registry: EndpointRegistry::new(),
            metrics: Arc::new(RouterMetrics::new()),
            next_channel: AtomicU64::new(1),
            primary: Mutex::new(None),
        }
    }

    /// Uses a shared metrics collector. Call before registering endpoints.
    pub fn with_metrics(mut self, metrics: Arc<RouterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Returns the registered endpoint names, sorted.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Registers an endpoint and hands it its back-channel.
    ///
    /// A second registration under the same name is rejected and the first
    /// endpoint stays in place.
    pub fn register(&self, endpoint: Arc<dyn Endpoint>) -> RouterResult<EndpointSender> {
        let name = endpoint.name().to_string();
        if let Err(e) = self.registry.insert(endpoint.clone()) {
            tracing::warn!(endpoint = %name, code = e.code(), "registration rejected");
            return Err(e);
        }

        let sender = self.sender_for(&name);
        endpoint.on_register(sender.clone());
        tracing::debug!(endpoint = %name, "endpoint registered");
        Ok(sender)
    }

    /// Registers a [`ControlEndpoint`] under the configured control name.
    pub fn register_control(&self, online: watch::Receiver<bool>) -> RouterResult<EndpointSender> {
        let endpoint = ControlEndpoint::new(self.config.control_endpoint.clone(), online);
        self.register(Arc::new(endpoint))
    }

    /// Removes an endpoint. Returns false if it was not registered.
    ///
    /// Removing the bridge endpoint closes the primary channel.
    pub fn unregister(&self, name: &str) -> bool {
        let has_primary = self.primary.lock().is_some();
        if has_primary && name == self.config.bridge_endpoint {
            self.close_primary_channel();
            return true;
        }

        let removed = self.registry.remove(name).is_some();
        if removed {
            tracing::debug!(endpoint = %name, "endpoint unregistered");
        }
        removed
    }

    /// Routes one message to its endpoint.
    ///
    /// An unknown endpoint name is a diagnostic; the message is dropped.
    pub fn dispatch(&self, channel_id: ChannelId, endpoint_name: &str, command: &str, args: Value) {
        if let Err(e) = self.try_dispatch(channel_id, endpoint_name, command, args) {
            tracing::warn!(
                channel = %channel_id,
                endpoint = %endpoint_name,
                command,
                code = e.code(),
                "message dropped"
            );
        }
    }

    /// Like [`dispatch`](Self::dispatch) but returns the routing error.
    pub fn try_dispatch(
        &self,
        channel_id: ChannelId,
        endpoint_name: &str,
        command: &str,
        args: Value,
    ) -> RouterResult<()> {
        let Some(endpoint) = self.registry.get(endpoint_name) else {
            RouterMetrics::incr(&self.metrics.unroutable);
            return Err(RouterError::UnregisteredEndpoint {
                name: endpoint_name.to_string(),
            });
        };

        tracing::trace!(channel = %channel_id, endpoint = %endpoint_name, command, "dispatch");
        endpoint.process(channel_id, command, args);
        RouterMetrics::incr(&self.metrics.dispatched);
        Ok(())
    }

    /// Handles one raw message from the background context.
    pub fn receive(&self, message: Value) {
        match parse_envelope(message) {
            Ok(envelope) => self.dispatch(
                envelope.channel_id,
                &envelope.endpoint_name,
                &envelope.command,
                envelope.args,
            ),
            Err(e) => {
                RouterMetrics::incr(&self.metrics.malformed);
                tracing::warn!(code = e.code(), error = %e, "inbound message dropped");
            }
        }
    }

    /// Allocates a new channel id.
    pub fn open_channel(&self) -> ChannelId {
        ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed))
    }

    /// Opens the primary channel in the Buffering state.
    ///
    /// Fails if a primary channel is already open.
    pub fn open_primary_channel(&self) -> RouterResult<PrimaryChannel> {
        let name = self.config.bridge_endpoint.as_str();
        if self.registry.contains(name) {
            return Err(RouterError::DuplicateEndpoint {
                name: name.to_string(),
            });
        }

        let channel_id = self.open_channel();
        let (channel, shared, endpoint) =
            PrimaryChannel::open(name, channel_id, self.sender_for(name), self.metrics.clone());
        self.registry.insert(Arc::new(endpoint))?;
        *self.primary.lock() = Some(shared);

        tracing::debug!(channel = %channel_id, endpoint = %name, "primary channel opened");
        Ok(channel)
    }

    /// Sends on the open primary channel, queueing until the handshake.
    pub fn send_on_primary_channel(&self, message: Value) -> RouterResult<()> {
        let primary = self.primary.lock().clone();
        match primary {
            Some(shared) => shared.send(message),
            None => Err(RouterError::UnregisteredEndpoint {
                name: self.config.bridge_endpoint.clone(),
            }),
        }
    }

    /// Tears the primary channel down. A new one starts in Buffering.
    ///
    /// Returns the messages still queued for a handshake that never came.
    /// Sends through the old [`PrimaryChannel`] fail from here on.
    pub fn close_primary_channel(&self) -> Vec<Value> {
        let Some(shared) = self.primary.lock().take() else {
            return Vec::new();
        };
        self.registry.remove(&self.config.bridge_endpoint);
        let pending = shared.close();
        if pending.is_empty() {
            tracing::debug!(endpoint = %self.config.bridge_endpoint, "primary channel closed");
        } else {
            tracing::warn!(
                endpoint = %self.config.bridge_endpoint,
                pending = pending.len(),
                "primary channel closed before handshake"
            );
        }
        pending
    }

    /// Tells every endpoint the background context is gone.
    ///
    /// The background context is not restarted.
    pub fn notify_disconnect(&self, reason: Option<&str>) {
        let endpoints = self.registry.all();
        tracing::warn!(
            reason = reason.unwrap_or("none"),
            endpoints = endpoints.len(),
            "background context disconnected"
        );
        for endpoint in endpoints {
            endpoint.on_disconnect(reason);
            RouterMetrics::incr(&self.metrics.disconnects);
        }
    }

    /// Pumps transport events until the background context goes away.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Some(TransportEvent::Message(message)) => self.receive(message),
                Some(TransportEvent::Terminated(reason)) => {
                    self.notify_disconnect(reason.as_deref());
                    break;
                }
                None => {
                    self.notify_disconnect(Some("transport closed"));
                    break;
                }
            }
        }
    }

    /// Unregisters everything, calling each endpoint's shutdown hook once.
    pub fn shutdown(&self) {
        if let Some(shared) = self.primary.lock().take() {
            shared.close();
        }
        for endpoint in self.registry.drain() {
            endpoint.shutdown();
        }
        tracing::debug!("router shut down");
    }

    fn sender_for(&self, name: &str) -> EndpointSender {
        EndpointSender::new(name, self.transport.clone(), self.metrics.clone())
    }
}

fn parse_envelope(message: Value) -> RouterResult<Envelope> {
    if !message.is_object() {
        return Err(RouterError::MalformedMessage {
            reason: "not an object".to_string(),
        });
    }
    let envelope: Envelope =
        serde_json::from_value(message).map_err(|e| RouterError::MalformedMessage {
            reason: e.to_string(),
        })?;
    if envelope.endpoint_name.is_empty() {
        return Err(RouterError::MalformedMessage {
            reason: "empty endpoint name".to_string(),
        });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{RecordingEndpoint, RecordingTransport};
    use serde_json::json;

    fn router() -> (Router, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (Router::new(transport.clone(), RouterConfig::default()), transport)
    }

    #[test]
    fn test_dispatch_to_registered() {
        let (router, _) = router();
        let maildb = Arc::new(RecordingEndpoint::new(names::MAILDB));
        router.register(maildb.clone()).unwrap();

        router.dispatch(ChannelId(3), "maildb", "getFolders", json!([1, 2]));

        assert_eq!(
            maildb.calls(),
            vec![(ChannelId(3), "getFolders".to_string(), json!([1, 2]))]
        );
        assert_eq!(router.metrics().snapshot().dispatched, 1);
    }

    #[test]
    fn test_unregistered_is_diagnostic_only() {
        let (router, _) = router();
        let net = Arc::new(RecordingEndpoint::new(names::NET));
        router.register(net.clone()).unwrap();

        router.dispatch(ChannelId(1), "nonexistent", "x", Value::Null);
        let err = router
            .try_dispatch(ChannelId(1), "nonexistent", "x", Value::Null)
            .unwrap_err();
        assert_eq!(err.code(), "unregistered-endpoint");

        router.dispatch(ChannelId(1), "net", "open", Value::Null);
        assert_eq!(net.calls().len(), 1);
        assert_eq!(router.metrics().snapshot().unroutable, 2);
    }

    #[test]
    fn test_unregister_then_dispatch() {
        let (router, _) = router();
        let wakelocks = Arc::new(RecordingEndpoint::new(names::WAKELOCKS));
        router.register(wakelocks.clone()).unwrap();

        assert!(router.unregister("wakelocks"));
        assert!(!router.unregister("wakelocks"));
        router.dispatch(ChannelId(1), "wakelocks", "requestWakeLock", Value::Null);
        assert!(wakelocks.calls().is_empty());
    }

    #[test]
    fn test_register_hands_out_sender() {
        let (router, transport) = router();
        let cronsync = Arc::new(RecordingEndpoint::new(names::CRONSYNC));
        let sender = router.register(cronsync.clone()).unwrap();
        assert_eq!(sender.name(), "cronsync");

        cronsync
            .sender()
            .unwrap()
            .send(ChannelId(9), "syncNow", json!(["acct"]))
            .unwrap();
        let sent = transport.envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].endpoint_name, "cronsync");
        assert_eq!(router.metrics().snapshot().forwarded, 1);
    }

    #[test]
    fn test_malformed_inbound_dropped() {
        let (router, _) = router();
        let bridge = Arc::new(RecordingEndpoint::new("devicestorage"));
        router.register(bridge.clone()).unwrap();

        router.receive(json!({"command": "x"}));
        router.receive(json!({"endpointName": "", "command": "x"}));
        router.receive(json!("devicestorage"));
        router.receive(json!({"endpointName": "devicestorage", "command": "get", "args": [1]}));

        assert_eq!(router.metrics().snapshot().malformed, 3);
        assert_eq!(bridge.calls().len(), 1);
    }

    #[test]
    fn test_channel_ids_are_distinct() {
        let (router, _) = router();
        let a = router.open_channel();
        let b = router.open_channel();
        assert_ne!(a, b);
    }

    #[test]
    fn test_primary_channel_buffers_until_hello() {
        let (router, transport) = router();
        let channel = router.open_primary_channel().unwrap();
        assert_eq!(channel.state(), ChannelState::Buffering);

        router.send_on_primary_channel(json!("A")).unwrap();
        channel.send(json!("B")).unwrap();
        assert!(transport.envelopes().is_empty());

        router.dispatch(channel.id(), names::BRIDGE, HELLO, json!({"debug": true}));
        assert!(channel.is_live());
        assert_eq!(channel.backend_config(), Some(json!({"debug": true})));

        channel.send(json!("C")).unwrap();
        let args: Vec<Value> = transport.envelopes().into_iter().map(|e| e.args).collect();
        assert_eq!(args, vec![json!("A"), json!("B"), json!("C")]);

        let snapshot = router.metrics().snapshot();
        assert_eq!(snapshot.buffered, 2);
        assert_eq!(snapshot.flushed, 2);
    }

    #[test]
    fn test_second_hello_is_ignored() {
        let (router, transport) = router();
        let channel = router.open_primary_channel().unwrap();
        channel.send(json!(1)).unwrap();

        router.dispatch(channel.id(), names::BRIDGE, HELLO, Value::Null);
        router.dispatch(channel.id(), names::BRIDGE, HELLO, json!({"late": true}));

        assert_eq!(transport.envelopes().len(), 1);
        assert!(channel.backend_config().is_none());
    }

    #[test]
    fn test_bridge_inbound_reaches_application() {
        let (router, _) = router();
        let mut channel = router.open_primary_channel().unwrap();

        router.dispatch(channel.id(), names::BRIDGE, "message", json!({"cmd": "folders"}));
        router.dispatch(channel.id(), names::BRIDGE, "message", json!({"cmd": "mail"}));

        assert_eq!(channel.try_recv(), Some(json!({"cmd": "folders"})));
        assert_eq!(channel.try_recv(), Some(json!({"cmd": "mail"})));
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn test_primary_channel_reopen() {
        let (router, _) = router();
        let first = router.open_primary_channel().unwrap();
        assert!(router.open_primary_channel().is_err());

        router.dispatch(first.id(), names::BRIDGE, HELLO, Value::Null);
        router.close_primary_channel();
        assert!(router.send_on_primary_channel(json!(1)).is_err());

        let second = router.open_primary_channel().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.state(), ChannelState::Buffering);
    }

    #[test]
    fn test_unregistering_bridge_closes_primary_channel() {
        let (router, transport) = router();
        let channel = router.open_primary_channel().unwrap();
        channel.send(json!("A")).unwrap();

        assert!(router.unregister(names::BRIDGE));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(router.send_on_primary_channel(json!("B")).is_err());
        let err = channel.send(json!("C")).unwrap_err();
        assert_eq!(err.code(), "unregistered-endpoint");

        // Nothing left to unregister, and a late hello has nowhere to go.
        assert!(!router.unregister(names::BRIDGE));
        router.dispatch(channel.id(), names::BRIDGE, HELLO, Value::Null);
        assert!(transport.envelopes().is_empty());
    }

    #[test]
    fn test_close_returns_unsent_messages() {
        let (router, _) = router();
        let channel = router.open_primary_channel().unwrap();
        channel.send(json!(1)).unwrap();
        router.send_on_primary_channel(json!(2)).unwrap();

        assert_eq!(router.close_primary_channel(), vec![json!(1), json!(2)]);
        assert!(router.close_primary_channel().is_empty());
    }

    #[test]
    fn test_stale_hello_does_not_open_new_channel() {
        let (router, transport) = router();
        let first = router.open_primary_channel().unwrap();
        router.close_primary_channel();

        let second = router.open_primary_channel().unwrap();
        second.send(json!("queued")).unwrap();
        router.dispatch(first.id(), names::BRIDGE, HELLO, json!({"stale": true}));

        assert_eq!(second.state(), ChannelState::Buffering);
        assert!(second.backend_config().is_none());
        assert!(transport.envelopes().is_empty());

        router.dispatch(second.id(), names::BRIDGE, HELLO, Value::Null);
        assert!(second.is_live());
        assert_eq!(transport.envelopes().len(), 1);
    }

    #[test]
    fn test_notify_disconnect_reaches_all() {
        let (router, _) = router();
        let maildb = Arc::new(RecordingEndpoint::new(names::MAILDB));
        let net = Arc::new(RecordingEndpoint::new(names::NET));
        router.register(maildb.clone()).unwrap();
        router.register(net.clone()).unwrap();

        router.notify_disconnect(Some("crashed"));

        assert_eq!(maildb.disconnects(), vec![Some("crashed".to_string())]);
        assert_eq!(net.disconnects(), vec![Some("crashed".to_string())]);
        assert_eq!(router.metrics().snapshot().disconnects, 2);
    }

    #[test]
    fn test_shutdown_calls_hook_once() {
        let (router, _) = router();
        let configparser = Arc::new(RecordingEndpoint::new(names::CONFIGPARSER));
        router.register(configparser.clone()).unwrap();

        router.shutdown();
        router.shutdown();

        assert_eq!(configparser.shutdown_count(), 1);
        assert!(router.endpoint_names().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_terminated() {
        let (router, _) = router();
        let maildb = Arc::new(RecordingEndpoint::new(names::MAILDB));
        router.register(maildb.clone()).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::Message(
            json!({"channelId": 1, "endpointName": "maildb", "command": "ping"}),
        ))
        .unwrap();
        tx.send(TransportEvent::Terminated(Some("exit".to_string())))
            .unwrap();

        router.run(rx).await;

        assert_eq!(maildb.calls().len(), 1);
        assert_eq!(maildb.disconnects(), vec![Some("exit".to_string())]);
    }

    #[test]
    fn test_well_known_names_are_unique() {
        let mut names = names::ALL.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
    }
}
