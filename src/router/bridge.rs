//! Primary application channel with handshake-gated buffering.
//!
//! The channel starts out Buffering: application sends queue up in order.
//! The first `hello` for the channel's id flips it to Live and flushes the
//! queue exactly once. Closing retires the channel; later sends fail.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::endpoint::{Endpoint, EndpointSender};
use crate::errors::{RouterError, RouterResult};
use crate::observability::{Redacted, RouterMetrics};
use crate::types::ChannelId;

/// Command the background context uses to signal readiness.
pub const HELLO: &str = "hello";

/// Command used for application payloads on the primary channel.
pub const MESSAGE: &str = "message";

/// Buffering state of the primary channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for `hello`; sends are queued.
    Buffering,
    /// Handshake done; sends go straight out.
    Live,
    /// Torn down by the owner; sends fail.
    Closed,
}

enum Gate {
    Buffering(VecDeque<Value>),
    Live,
    Closed,
}

/// State shared between the registered endpoint and the application handle.
pub(crate) struct BridgeShared {
    channel_id: ChannelId,
    gate: Mutex<Gate>,
    backend_config: Mutex<Option<Value>>,
    sender: EndpointSender,
    metrics: Arc<RouterMetrics>,
}

impl BridgeShared {
    /// Queues or forwards one application message.
    ///
    /// Forwarding happens under the gate lock so a flush and a concurrent
    /// send cannot interleave.
    pub(crate) fn send(&self, message: Value) -> RouterResult<()> {
        let mut gate = self.gate.lock();
        match &mut *gate {
            Gate::Buffering(queue) => {
                queue.push_back(message);
                RouterMetrics::incr(&self.metrics.buffered);
                Ok(())
            }
            Gate::Live => self.sender.send(self.channel_id, MESSAGE, message),
            Gate::Closed => Err(RouterError::UnregisteredEndpoint {
                name: self.sender.name().to_string(),
            }),
        }
    }

    fn state(&self) -> ChannelState {
        match &*self.gate.lock() {
            Gate::Buffering(_) => ChannelState::Buffering,
            Gate::Live => ChannelState::Live,
            Gate::Closed => ChannelState::Closed,
        }
    }

    /// Retires the channel, returning messages that never went out.
    pub(crate) fn close(&self) -> Vec<Value> {
        match std::mem::replace(&mut *self.gate.lock(), Gate::Closed) {
            Gate::Buffering(queue) => queue.into(),
            Gate::Live | Gate::Closed => Vec::new(),
        }
    }

    fn handshake(&self, channel_id: ChannelId, args: Value) {
        if channel_id != self.channel_id {
            tracing::warn!(expected = %self.channel_id, got = %channel_id, "hello for another channel ignored");
            return;
        }

        let mut gate = self.gate.lock();
        let queue = match &mut *gate {
            Gate::Buffering(queue) => std::mem::take(queue),
            Gate::Live => {
                tracing::warn!(channel = %self.channel_id, "hello on a live channel ignored");
                return;
            }
            Gate::Closed => {
                tracing::warn!(channel = %self.channel_id, "hello on a closed channel ignored");
                return;
            }
        };
        *gate = Gate::Live;

        if !args.is_null() {
            tracing::debug!(channel = %self.channel_id, config = ?Redacted::new(&args), "backend config received");
            *self.backend_config.lock() = Some(args);
        }

        let pending = queue.len();
        for message in queue {
            if let Err(e) = self.sender.send(self.channel_id, MESSAGE, message) {
                tracing::warn!(channel = %self.channel_id, code = e.code(), error = %e, "flush failed");
            }
        }
        RouterMetrics::add(&self.metrics.flushed, pending as u64);
        tracing::debug!(channel = %self.channel_id, flushed = pending, "primary channel live");
    }
}

/// The registered half of the primary channel.
pub(crate) struct BridgeEndpoint {
    name: String,
    shared: Arc<BridgeShared>,
    inbound: mpsc::UnboundedSender<Value>,
}

impl Endpoint for BridgeEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, channel_id: ChannelId, command: &str, args: Value) {
        if command == HELLO {
            self.shared.handshake(channel_id, args);
            return;
        }
        if channel_id != self.shared.channel_id {
            tracing::debug!(expected = %self.shared.channel_id, got = %channel_id, "bridge message for another channel");
        }
        if self.inbound.send(args).is_err() {
            tracing::debug!(channel = %self.shared.channel_id, "application receiver dropped");
        }
    }

    fn on_disconnect(&self, reason: Option<&str>) {
        tracing::warn!(channel = %self.shared.channel_id, reason = reason.unwrap_or("unknown"), "primary channel lost");
    }
}

/// Application handle to the primary channel.
pub struct PrimaryChannel {
    shared: Arc<BridgeShared>,
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl std::fmt::Debug for PrimaryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryChannel")
            .field("channel_id", &self.shared.channel_id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl PrimaryChannel {
    /// Creates both halves of a new channel in the Buffering state.
    pub(crate) fn open(
        name: &str,
        channel_id: ChannelId,
        sender: EndpointSender,
        metrics: Arc<RouterMetrics>,
    ) -> (Self, Arc<BridgeShared>, BridgeEndpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BridgeShared {
            channel_id,
            gate: Mutex::new(Gate::Buffering(VecDeque::new())),
            backend_config: Mutex::new(None),
            sender,
            metrics,
        });
        let endpoint = BridgeEndpoint {
            name: name.to_string(),
            shared: shared.clone(),
            inbound: tx,
        };
        (
            Self {
                shared: shared.clone(),
                inbound: rx,
            },
            shared,
            endpoint,
        )
    }

    /// Channel id assigned at open.
    pub fn id(&self) -> ChannelId {
        self.shared.channel_id
    }

    /// Current buffering state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Returns true once the handshake has completed.
    pub fn is_live(&self) -> bool {
        self.state() == ChannelState::Live
    }

    /// Sends an application message, queueing it until the handshake.
    pub fn send(&self, message: Value) -> RouterResult<()> {
        self.shared.send(message)
    }

    /// Configuration carried by the background context's `hello`, if any.
    pub fn backend_config(&self) -> Option<Value> {
        self.shared.backend_config.lock().clone()
    }

    /// Waits for the next inbound application message.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Returns the next inbound application message if one is ready.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.inbound.try_recv().ok()
    }
}
