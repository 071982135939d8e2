//! Pending-notification queue, retry backoff, and ack-escalation timers.
//!
//! The queue is pure state plus time arithmetic; the engine drives it from
//! `check_notifications` and performs the actual rendering and sending after
//! releasing the store lock.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::config::DispatchConfig;
use crate::model::{AlertKey, Status};
use crate::silence::SilenceStore;

/// What a pending notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A single incident at a severity
    Incident { status: Status },
    /// A per-alert digest of keys that went unknown
    UnknownGroup,
}

/// A decision waiting to become an outbound delivery.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    /// Notification definition to deliver through
    pub notification: String,
    /// Alert definition the keys belong to
    pub alert: String,
    /// Keys grouped into one rendered message
    pub keys: Vec<AlertKey>,
    /// What kind of message this is
    pub kind: NotificationKind,
    /// When the decision was made
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub attempt: u32,
    /// Not dispatched before this instant (backoff)
    pub next_attempt_at: DateTime<Utc>,
}

/// An armed needs-ack escalation: if the incident is still open and
/// unacknowledged at `due_at`, the keys are re-enqueued to the next chain
/// link.
#[derive(Debug, Clone)]
pub struct Escalation {
    /// Chain link to escalate to
    pub next_notification: String,
    /// Alert definition
    pub alert: String,
    /// Keys to escalate
    pub keys: Vec<AlertKey>,
    /// Severity the escalated notification is about
    pub status: Status,
    /// When the escalation fires
    pub due_at: DateTime<Utc>,
}

/// Queue of pending notifications and armed escalations.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    pending: Vec<PendingNotification>,
    escalations: Vec<Escalation>,
}

impl NotificationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending notification.
    pub fn enqueue(&mut self, pending: PendingNotification) {
        self.pending.push(pending);
    }

    /// Remove and return every pending notification that is due.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingNotification> {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.next_attempt_at <= now);
        self.pending = rest;
        due
    }

    /// Requeue a failed delivery with exponential backoff.
    pub fn requeue_failed(
        &mut self,
        mut pending: PendingNotification,
        config: &DispatchConfig,
        now: DateTime<Utc>,
    ) {
        pending.attempt += 1;
        pending.next_attempt_at = now + backoff(pending.attempt, config);
        self.pending.push(pending);
    }

    /// Arm a needs-ack escalation timer.
    pub fn arm_escalation(&mut self, escalation: Escalation) {
        self.escalations.push(escalation);
    }

    /// Remove and return escalations that are due.
    pub fn take_due_escalations(&mut self, now: DateTime<Utc>) -> Vec<Escalation> {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.escalations)
            .into_iter()
            .partition(|e| e.due_at <= now);
        self.escalations = rest;
        due
    }

    /// Clear armed escalations covering a key (acknowledge/close).
    pub fn clear_escalations(&mut self, key: &AlertKey) {
        self.escalations.retain(|e| !e.keys.contains(key));
    }

    /// Remove every queued pending that covers a key (purge action).
    pub fn purge_key(&mut self, key: &AlertKey) {
        self.pending.retain(|p| !p.keys.contains(key));
        self.clear_escalations(key);
    }

    /// Remove pendings whose keys are all covered by a matching silence,
    /// returning them for the delivery log. Used when a forced silence is
    /// created: already-enqueued, undelivered notifications are suppressed
    /// immediately.
    pub fn purge_silenced(
        &mut self,
        silences: &SilenceStore,
        now: DateTime<Utc>,
    ) -> Vec<PendingNotification> {
        let (silenced, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.keys.iter().all(|k| silences.is_silenced(k, now)));
        self.pending = rest;
        silenced
    }

    /// Number of queued pendings.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of armed escalations.
    #[must_use]
    pub fn escalation_count(&self) -> usize {
        self.escalations.len()
    }
}

/// Coalesce due pendings addressed to the same (notification, alert, kind)
/// into one delivery, preserving first-seen order of both groups and keys.
#[must_use]
pub fn coalesce(due: Vec<PendingNotification>) -> Vec<PendingNotification> {
    let mut order: Vec<(String, String, NotificationKind)> = Vec::new();
    let mut merged: HashMap<(String, String, NotificationKind), PendingNotification> =
        HashMap::new();

    for pending in due {
        let slot = (
            pending.notification.clone(),
            pending.alert.clone(),
            pending.kind,
        );
        if let Some(existing) = merged.get_mut(&slot) {
            for key in pending.keys {
                if !existing.keys.contains(&key) {
                    existing.keys.push(key);
                }
            }
            // Retry bookkeeping carries the most-attempted member so the
            // group cannot retry forever by re-merging with fresh entries.
            existing.attempt = existing.attempt.max(pending.attempt);
        } else {
            order.push(slot.clone());
            merged.insert(slot, pending);
        }
    }

    order
        .into_iter()
        .map(|slot| merged.remove(&slot).expect("slot was just inserted"))
        .collect()
}

/// Exponential backoff for a failed attempt, capped.
#[must_use]
pub fn backoff(attempt: u32, config: &DispatchConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = config
        .backoff_secs
        .saturating_mul(1u64 << exp)
        .min(config.backoff_cap_secs);
    Duration::seconds(secs as i64)
}
