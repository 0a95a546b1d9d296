//! Endpoint and background transport seams.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::errors::RouterResult;
use crate::observability::RouterMetrics;
use crate::types::{ChannelId, Envelope};

/// A named message handler.
///
/// Handlers run on the caller's task and must not block.
pub trait Endpoint: Send + Sync {
    /// Unique name the endpoint is addressed by.
    fn name(&self) -> &str;

    /// Called once when the endpoint is registered, with its back-channel.
    fn on_register(&self, sender: EndpointSender) {
        let _ = sender;
    }

    /// Handles one inbound message.
    fn process(&self, channel_id: ChannelId, command: &str, args: Value);

    /// Called when the background context goes away.
    fn on_disconnect(&self, reason: Option<&str>) {
        let _ = reason;
    }

    /// Called once when the router shuts down.
    fn shutdown(&self) {}
}

/// Posting side of the link to the background context.
pub trait BackgroundTransport: Send + Sync {
    /// Posts one message. Must not block and must preserve call order.
    fn post(&self, envelope: Envelope) -> RouterResult<()>;
}

/// Something that happened on the background side of the link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A raw message, expected to be an envelope.
    Message(Value),
    /// The background context is gone.
    Terminated(Option<String>),
}

/// Back-channel bound to one endpoint name.
#[derive(Clone)]
pub struct EndpointSender {
    name: Arc<str>,
    transport: Arc<dyn BackgroundTransport>,
    metrics: Arc<RouterMetrics>,
}

impl fmt::Debug for EndpointSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSender").field("name", &self.name).finish()
    }
}

impl EndpointSender {
    pub(crate) fn new(
        name: &str,
        transport: Arc<dyn BackgroundTransport>,
        metrics: Arc<RouterMetrics>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            transport,
            metrics,
        }
    }

    /// Endpoint name this sender posts as.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts `{channelId, endpointName, command, args}` to the background context.
    pub fn send(&self, channel_id: ChannelId, command: &str, args: Value) -> RouterResult<()> {
        let envelope = Envelope::new(channel_id, &*self.name, command, args);
        self.transport.post(envelope)?;
        RouterMetrics::incr(&self.metrics.forwarded);
        Ok(())
    }
}
