//! Channel trait — the abstract interface every chat channel must implement.
//!
//! Port of nanobot's `channels/base.py` `BaseChannel` ABC.
//!
//! Each channel (Telegram, Discord, etc.) implements this trait to:
//! - `start()` — begin listening for incoming messages (long-running)
//! - `stop()` — graceful shutdown
//! - `send()` — deliver an outbound message to the channel
//! - `name()` — channel identifier matching config keys

use async_trait::async_trait;
use fernkit_core::bus::types::OutboundMessage;

/// Every chat channel implements this trait.
///
/// The `ChannelManager` holds `Box<dyn Channel>` and orchestrates
/// start/stop/send across all enabled channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram", "discord", "slack").
    ///
    /// Must match the key used in config and in `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// This should be a long-running task that publishes `InboundMessage`s
    /// to the message bus. It runs until `stop()` is called or the
    /// shutdown signal is received.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown — stop listening and clean up resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Send an outbound message to this channel.
    ///
    /// Called by the `ChannelManager`'s outbound dispatcher when
    /// it receives a message targeted at this channel.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}


