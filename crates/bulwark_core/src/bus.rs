//! Message-bus collaborator surface.
//!
//! The error center only announces lifecycle events through the bus; it never
//! depends on how the substrate routes them.

use crate::error::CoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Event emitted when a module is registered
pub const EVENT_MODULE_REGISTERED: &str = "module_registered";
/// Event emitted when a module is unregistered
pub const EVENT_MODULE_UNREGISTERED: &str = "module_unregistered";

/// Message addressed to one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Message kind
    pub kind: String,
    /// Payload
    pub payload: Value,
}

impl BusMessage {
    /// Create a message
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Bus substrate used to reach modules
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver a message to one module
    ///
    /// # Errors
    ///
    /// Returns error if the substrate rejects the message
    async fn send(&self, target_module_id: &str, message: BusMessage) -> CoreResult<()>;

    /// Announce an event to every listener
    ///
    /// # Errors
    ///
    /// Returns error if the substrate rejects the event
    async fn broadcast(&self, event: &str, payload: Value) -> CoreResult<()>;
}

/// Bus that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBus;

#[async_trait]
impl MessageBus for NoopBus {
    async fn send(&self, _target_module_id: &str, _message: BusMessage) -> CoreResult<()> {
        Ok(())
    }

    async fn broadcast(&self, _event: &str, _payload: Value) -> CoreResult<()> {
        Ok(())
    }
}

/// Envelope seen by [`ChannelBus`] subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum BusEnvelope {
    /// Point-to-point message
    Direct {
        /// Target module
        target: String,
        /// Message
        message: BusMessage,
    },
    /// Broadcast event
    Broadcast {
        /// Event name
        event: String,
        /// Payload
        payload: Value,
    },
}

/// In-process bus fanning out to `tokio::sync::broadcast` subscribers
#[derive(Debug, Clone)]
pub struct ChannelBus {
    sender: broadcast::Sender<BusEnvelope>,
}

impl ChannelBus {
    /// Create a bus buffering up to `capacity` envelopes per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every envelope published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.sender.subscribe()
    }

    fn publish(&self, envelope: BusEnvelope) {
        // No subscribers is not an error for an announcement bus.
        if self.sender.send(envelope).is_err() {
            debug!("bus envelope dropped: no subscribers");
        }
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn send(&self, target_module_id: &str, message: BusMessage) -> CoreResult<()> {
        self.publish(BusEnvelope::Direct {
            target: target_module_id.to_string(),
            message,
        });
        Ok(())
    }

    async fn broadcast(&self, event: &str, payload: Value) -> CoreResult<()> {
        self.publish(BusEnvelope::Broadcast {
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}
