//! Observable delivery outcomes.
//!
//! Every dispatch decision ends in exactly one event appended to the log:
//! sent, failed (will retry), dropped (retries exhausted), silenced, or
//! undeliverable (bad configuration). Tests and operators query the log
//! instead of poking at queue internals; subscribers get the same events as
//! a live stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::AlertKey;

/// Terminal or intermediate outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// All channels of the notification definition accepted the payload
    Sent,
    /// At least one channel failed; the notification was requeued
    Failed { attempt: u32, error: String },
    /// Retries exhausted; the notification was dropped
    Dropped { attempts: u32 },
    /// A silence suppressed the delivery
    Silenced,
    /// The notification or its template is missing from configuration
    Undeliverable { reason: String },
}

/// One entry in the delivery log.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEvent {
    /// Notification definition the delivery was addressed to
    pub notification: String,
    /// Alert definition the keys belong to
    pub alert: String,
    /// Keys covered by the delivery
    pub keys: Vec<AlertKey>,
    /// Rendered subject, when rendering got that far
    pub subject: Option<String>,
    /// What happened
    pub outcome: DeliveryOutcome,
    /// When it happened
    pub time: DateTime<Utc>,
}

/// Append-only log of delivery events with an optional live subscriber.
#[derive(Debug, Default)]
pub struct DeliveryLog {
    events: Vec<DeliveryEvent>,
    subscribers: Vec<mpsc::UnboundedSender<DeliveryEvent>>,
}

impl DeliveryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and fan it out to live subscribers.
    pub fn record(&mut self, event: DeliveryEvent) {
        debug!(
            notification = %event.notification,
            alert = %event.alert,
            outcome = ?event.outcome,
            "Delivery event"
        );
        // Dead subscribers are dropped on the way through.
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        self.events.push(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DeliveryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// All events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[DeliveryEvent] {
        &self.events
    }

    /// Count events that were actually sent.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.outcome == DeliveryOutcome::Sent)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: DeliveryOutcome) -> DeliveryEvent {
        DeliveryEvent {
            notification: "n".to_string(),
            alert: "a".to_string(),
            keys: vec![AlertKey::bare("a")],
            subject: Some("warning".to_string()),
            outcome,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_log_appends_and_counts() {
        let mut log = DeliveryLog::new();
        log.record(event(DeliveryOutcome::Sent));
        log.record(event(DeliveryOutcome::Silenced));
        log.record(event(DeliveryOutcome::Sent));

        assert_eq!(log.events().len(), 3);
        assert_eq!(log.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let mut log = DeliveryLog::new();
        let mut rx = log.subscribe();

        log.record(event(DeliveryOutcome::Sent));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.outcome, DeliveryOutcome::Sent);
    }
}
