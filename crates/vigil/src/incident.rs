//! Per-key incident records and the store that owns them.
//!
//! The store has a single-writer discipline: only the engine mutates it,
//! under the engine's write lock. Everything here is synchronous bookkeeping;
//! no I/O, no rendering, no decisioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::EngineError;
use crate::model::{AlertKey, Status};

/// Durable record for one alert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// The key this incident tracks
    pub key: AlertKey,
    /// Status from the most recent run
    pub current_status: Status,
    /// Status from the run before that
    pub previous_status: Status,
    /// True from the first abnormal transition until explicitly closed
    pub open: bool,
    /// Highest severity reached since the incident opened
    pub last_abnormal_status: Option<Status>,
    /// Severity that was last actually notified; `None` means no
    /// notification has gone out for the current incident
    pub last_notified_status: Option<Status>,
    /// When the last notification was enqueued
    pub last_notified_time: Option<DateTime<Utc>>,
    /// Whether a human has acknowledged the incident
    pub acknowledged: bool,
    /// When the incident opened
    pub opened_time: Option<DateTime<Utc>>,
    /// When the incident was last closed
    pub closed_time: Option<DateTime<Utc>>,
    /// When the incident returned to normal while still open
    pub resolved_since: Option<DateTime<Utc>>,
    /// Consecutive unknown results (feeds the unknown grouper)
    pub unevaluated_count: u32,
}

impl Incident {
    /// Create a fresh record for a key. A new record is closed and normal;
    /// the first event transition does the opening.
    #[must_use]
    pub fn new(key: AlertKey) -> Self {
        Self {
            key,
            current_status: Status::Normal,
            previous_status: Status::Normal,
            open: false,
            last_abnormal_status: None,
            last_notified_status: None,
            last_notified_time: None,
            acknowledged: false,
            opened_time: None,
            closed_time: None,
            resolved_since: None,
            unevaluated_count: 0,
        }
    }

    /// Apply one evaluation result to this record.
    ///
    /// Pure bookkeeping: opening, severity escalation of
    /// `last_abnormal_status`, and the unknown counter. Whether the
    /// transition also notifies is the policy's call, made against the
    /// record as it was *before* this method ran.
    pub fn transition(&mut self, status: Status, time: DateTime<Utc>) {
        self.previous_status = self.current_status;
        self.current_status = status;

        if status == Status::Unknown {
            self.unevaluated_count += 1;
        } else {
            self.unevaluated_count = 0;
        }

        if status.is_abnormal() {
            self.resolved_since = None;
            if !self.open {
                self.open = true;
                self.opened_time = Some(time);
                self.acknowledged = false;
                // A re-opened incident is a fresh one: prior notification
                // history no longer suppresses anything.
                self.last_notified_status = None;
                self.last_abnormal_status = status.is_evaluated().then_some(status);
            } else if status.more_severe_than(self.last_abnormal_status) {
                self.last_abnormal_status = Some(status);
            }
        } else if self.open && self.resolved_since.is_none() {
            self.resolved_since = Some(time);
        }
    }

    /// Record that a notification was actually enqueued at this severity.
    pub fn mark_notified(&mut self, status: Status, time: DateTime<Utc>) {
        self.last_notified_status = Some(status);
        self.last_notified_time = Some(time);
    }

    /// Close the incident: the next abnormal transition is a fresh incident,
    /// eligible for notification regardless of prior flap suppression.
    pub fn close(&mut self, time: DateTime<Utc>) {
        self.open = false;
        self.closed_time = Some(time);
        self.last_notified_status = None;
        self.last_abnormal_status = None;
        self.acknowledged = false;
        self.resolved_since = None;
    }
}

/// Owner of all incident records.
#[derive(Debug, Default)]
pub struct IncidentStore {
    incidents: HashMap<AlertKey, Incident>,
}

impl IncidentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records.
    #[must_use]
    pub fn from_records(records: Vec<Incident>) -> Self {
        Self {
            incidents: records
                .into_iter()
                .map(|i| (i.key.clone(), i))
                .collect(),
        }
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, key: &AlertKey) -> Option<&Incident> {
        self.incidents.get(key)
    }

    /// Look up a record, creating a fresh one on first sight of the key.
    pub fn get_or_create(&mut self, key: &AlertKey) -> &mut Incident {
        self.incidents
            .entry(key.clone())
            .or_insert_with(|| Incident::new(key.clone()))
    }

    /// Close an incident via explicit action.
    pub fn close(&mut self, key: &AlertKey, time: DateTime<Utc>) -> Result<(), EngineError> {
        let incident = self
            .incidents
            .get_mut(key)
            .ok_or_else(|| EngineError::NotFound(format!("no incident for {key}")))?;
        incident.close(time);
        debug!(key = %key, "Incident closed");
        Ok(())
    }

    /// Acknowledge an incident: clears needs-ack escalation without touching
    /// severity bookkeeping.
    pub fn acknowledge(&mut self, key: &AlertKey) -> Result<(), EngineError> {
        let incident = self
            .incidents
            .get_mut(key)
            .ok_or_else(|| EngineError::NotFound(format!("no incident for {key}")))?;
        incident.acknowledged = true;
        debug!(key = %key, "Incident acknowledged");
        Ok(())
    }

    /// Remove an incident's history entirely.
    pub fn forget(&mut self, key: &AlertKey) -> Result<(), EngineError> {
        self.incidents
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("no incident for {key}")))
    }

    /// Iterate all records.
    pub fn iter(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    /// Snapshot all records for persistence.
    #[must_use]
    pub fn records(&self) -> Vec<Incident> {
        let mut records: Vec<Incident> = self.incidents.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AlertKey {
        AlertKey::new("a", [("host", "x")])
    }

    #[test]
    fn test_first_abnormal_opens() {
        let now = Utc::now();
        let mut incident = Incident::new(key());

        incident.transition(Status::Warning, now);
        assert!(incident.open);
        assert_eq!(incident.opened_time, Some(now));
        assert_eq!(incident.last_abnormal_status, Some(Status::Warning));
        assert_eq!(incident.last_notified_status, None);
    }

    #[test]
    fn test_last_abnormal_is_monotonic_while_open() {
        let now = Utc::now();
        let mut incident = Incident::new(key());

        incident.transition(Status::Critical, now);
        incident.transition(Status::Warning, now);
        assert_eq!(incident.last_abnormal_status, Some(Status::Critical));

        incident.transition(Status::Normal, now);
        assert_eq!(incident.last_abnormal_status, Some(Status::Critical));
        assert!(incident.open, "normal does not auto-close");
    }

    #[test]
    fn test_close_resets_notified_state() {
        let now = Utc::now();
        let mut incident = Incident::new(key());

        incident.transition(Status::Warning, now);
        incident.mark_notified(Status::Warning, now);
        incident.close(now);

        assert!(!incident.open);
        assert_eq!(incident.last_notified_status, None);
        assert_eq!(incident.closed_time, Some(now));

        // Re-opening is a fresh incident
        incident.transition(Status::Warning, now);
        assert!(incident.open);
        assert_eq!(incident.last_notified_status, None);
    }

    #[test]
    fn test_unknown_counts_consecutive_runs() {
        let now = Utc::now();
        let mut incident = Incident::new(key());

        incident.transition(Status::Unknown, now);
        incident.transition(Status::Unknown, now);
        assert_eq!(incident.unevaluated_count, 2);
        assert!(incident.open);
        assert_eq!(incident.last_abnormal_status, None);

        incident.transition(Status::Warning, now);
        assert_eq!(incident.unevaluated_count, 0);
    }

    #[test]
    fn test_store_actions() {
        let now = Utc::now();
        let mut store = IncidentStore::new();
        let k = key();

        assert!(matches!(
            store.close(&k, now),
            Err(EngineError::NotFound(_))
        ));

        store.get_or_create(&k).transition(Status::Warning, now);
        store.acknowledge(&k).unwrap();
        assert!(store.get(&k).unwrap().acknowledged);

        store.close(&k, now).unwrap();
        assert!(!store.get(&k).unwrap().open);
        assert_eq!(store.len(), 1);

        store.forget(&k).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.iter().count(), 0);
    }
}
