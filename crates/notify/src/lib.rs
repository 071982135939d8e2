//! Delivery channels for vigil notifications.
//!
//! This crate provides the transport layer of the alerting core: a rendered
//! notification (subject + body) goes in, a delivery outcome comes out. The
//! decisioning engine never talks to the network directly; it hands payloads
//! to a [`Sender`] and reacts to the result.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Payload, Sender, WebhookSender};
//!
//! # async fn example() -> Result<(), notify::ChannelError> {
//! let sender = WebhookSender::new("https://ops.example.com/hook".to_string());
//! sender
//!     .send(&Payload {
//!         subject: "warning".to_string(),
//!         body: "cpu above threshold".to_string(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The channel design is trait-based for extensibility:
//!
//! - [`Sender`] defines the interface for delivery channels
//! - [`WebhookSender`] POSTs JSON payloads to a URL
//! - [`ConsoleSender`] prints subjects to stdout (`print = true` definitions)
//! - [`send_all`] fans a payload out to a set of channels and collects
//!   per-channel outcomes

pub mod channels;
pub mod error;

pub use channels::console::ConsoleSender;
pub use channels::webhook::WebhookSender;
pub use channels::Sender;
pub use error::ChannelError;

use std::sync::Arc;

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Rendered subject line
    pub subject: String,
    /// Rendered body text
    pub body: String,
}

/// Send a payload to every channel in a set, collecting per-channel results.
///
/// Unlike a fire-and-forget dispatch, the caller gets every outcome back so
/// it can drive retry and escalation. Channels are tried in order; a failing
/// channel does not prevent the rest from being attempted.
pub async fn send_all(
    senders: &[Arc<dyn Sender>],
    payload: &Payload,
) -> Vec<(String, Result<(), ChannelError>)> {
    let mut results = Vec::with_capacity(senders.len());

    for sender in senders {
        let label = format!("{}:{}", sender.name(), sender.endpoint());
        let result = sender.send(payload).await;
        results.push((label, result));
    }

    results
}
