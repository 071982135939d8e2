//! Console delivery channel.
//!
//! Writes the rendered subject to stdout. Used by `print = true` notification
//! definitions, mostly for local runs and tests.

use async_trait::async_trait;
use tracing::debug;

use crate::error::ChannelError;
use crate::{Payload, Sender};

/// Console (stdout) delivery channel.
#[derive(Debug, Default)]
pub struct ConsoleSender;

impl ConsoleSender {
    /// Create a console sender.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sender for ConsoleSender {
    fn name(&self) -> &'static str {
        "console"
    }

    fn endpoint(&self) -> String {
        "stdout".to_string()
    }

    async fn send(&self, payload: &Payload) -> Result<(), ChannelError> {
        println!("{}", payload.subject);
        debug!(channel = "console", subject = %payload.subject, "Notification printed");
        Ok(())
    }
}
