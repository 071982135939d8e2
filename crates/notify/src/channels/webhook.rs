//! Webhook delivery channel.
//!
//! POSTs the rendered payload as JSON to a configured URL. This is the
//! transport behind `post = <url>` notification definitions.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::{Payload, Sender};

/// Default per-attempt send timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Webhook delivery channel.
pub struct WebhookSender {
    url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl WebhookSender {
    /// Create a webhook sender for a URL with the default timeout.
    #[must_use]
    pub fn new(url: String) -> Self {
        Self::with_timeout(url, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a webhook sender with an explicit per-attempt timeout.
    #[must_use]
    pub fn with_timeout(url: String, timeout_secs: u64) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl Sender for WebhookSender {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn send(&self, payload: &Payload) -> Result<(), ChannelError> {
        let body = WebhookBody {
            subject: &payload.subject,
            body: &payload.body,
        };

        debug!(channel = "webhook", url = %self.url, "Sending notification");

        let request = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send();

        let response = match request.await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(ChannelError::Timeout {
                    secs: self.timeout_secs,
                });
            }
            Err(e) => return Err(ChannelError::Http(e)),
        };

        if response.status().is_success() {
            debug!(channel = "webhook", url = %self.url, "Notification delivered");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "webhook",
                url = %self.url,
                status = %status,
                "Webhook request failed"
            );

            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    subject: &'a str,
    body: &'a str,
}
