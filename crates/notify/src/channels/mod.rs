//! Delivery channel implementations.

pub mod console;
pub mod webhook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::Payload;

/// Trait for delivery channels (webhook, console, etc.).
///
/// A channel owns its endpoint; the caller hands it a rendered payload and
/// gets back a delivery outcome. Channels must be safe to share across the
/// dispatcher's send tasks.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Get the name of this channel kind.
    fn name(&self) -> &'static str;

    /// Human-readable endpoint description for logging.
    fn endpoint(&self) -> String;

    /// Deliver a rendered payload to this channel's endpoint.
    async fn send(&self, payload: &Payload) -> Result<(), ChannelError>;
}
