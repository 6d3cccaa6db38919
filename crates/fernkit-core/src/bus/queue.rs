//! Async message bus — the central nervous system of Fernkit.
//!
//! Replaces nanobot's `bus/queue.py` (asyncio.Queue-based MessageBus).
//! Uses unbounded tokio::sync::mpsc channels: publishers never block,
//! and the bus itself imposes no back-pressure (matching the in-process,
//! single-host scope of this runtime).

use std::time::Duration;

use super::types::{InboundMessage, OutboundMessage};
use tokio::sync::mpsc;

/// The message bus connecting channels ↔ agent loop.
///
/// - Channels publish to `inbound` (user messages arriving)
/// - Agent loop consumes from `inbound`, processes, publishes to `outbound`
/// - Channel manager consumes from `outbound` and routes to correct channel
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a new, unbounded message bus.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    /// Publish a message from a channel to the agent (inbound). Never blocks.
    pub fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg)
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next inbound message, or None if `timeout` elapses first.
    ///
    /// Used by the AgentLoop's cooperative shutdown: a short timeout lets it
    /// observe a stop signal without holding the receiver lock indefinitely.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Publish a response from the agent to a channel (outbound). Never blocks.
    pub fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg)
    }

    /// Consume the next outbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Get a clone of the inbound sender (for channels to use).
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Get a clone of the outbound sender (for the agent loop to use).
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
