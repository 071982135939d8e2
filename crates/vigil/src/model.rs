//! Core data model: alert keys, statuses, events, and run histories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identity of a monitored entity: alert definition name plus tag set.
///
/// Tags are kept ordered so the rendered form (`name{k=v,...}`) is
/// deterministic and usable as a stable identifier in logs, templates, and
/// the state file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    /// Alert definition name
    pub name: String,
    /// Tag set (unordered semantics, ordered storage)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl AlertKey {
    /// Create an alert key from a name and tag pairs.
    #[must_use]
    pub fn new<N, K, V>(name: N, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        N: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Create an alert key with no tags.
    #[must_use]
    pub fn bare<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            write!(f, "{{")?;
            for (i, (k, v)) in self.tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Evaluation status of an alert key.
///
/// `Normal < Warning < Critical` is the severity order used for escalation
/// decisions. `Unknown` means the key could not be evaluated; it carries no
/// severity and never participates in severity comparisons — unknown results
/// are batched and routed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Key was not evaluated (collector outage, missing data)
    Unknown,
    /// Evaluation succeeded, no threshold crossed
    Normal,
    /// Warning threshold crossed
    Warning,
    /// Critical threshold crossed
    Critical,
}

impl Status {
    /// Explicit severity table. `None` for Unknown: it is not comparable
    /// with the severity order.
    #[must_use]
    pub const fn severity(self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Normal => Some(0),
            Self::Warning => Some(1),
            Self::Critical => Some(2),
        }
    }

    /// Whether this status keeps (or opens) an incident.
    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        matches!(self, Self::Warning | Self::Critical | Self::Unknown)
    }

    /// Whether this status has a severity rank (Warning/Critical/Normal).
    #[must_use]
    pub const fn is_evaluated(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Strictly more severe than another status. Unknown on either side
    /// never compares as more severe.
    #[must_use]
    pub fn more_severe_than(self, other: Option<Status>) -> bool {
        match (self.severity(), other.and_then(Status::severity)) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Display name as used in templates and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluation outcome for an alert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Evaluated status
    pub status: Status,
    /// Evaluation timestamp
    pub time: DateTime<Utc>,
    /// Computed values from the evaluation (for display)
    #[serde(default)]
    pub values: HashMap<String, f64>,
}

impl Event {
    /// Create an event with no computed values.
    #[must_use]
    pub fn new(status: Status, time: DateTime<Utc>) -> Self {
        Self {
            status,
            time,
            values: HashMap::new(),
        }
    }
}

/// One evaluation pass: an insertion-ordered mapping from alert key to event.
///
/// Insertion order is preserved so downstream grouping (and therefore
/// notification content) is deterministic. Inserting an event for a key that
/// is already present replaces the earlier event; a run carries at most one
/// event per key.
#[derive(Debug, Clone)]
pub struct RunHistory {
    events: Vec<(AlertKey, Event)>,
    /// Logical timestamp of the pass
    pub time: DateTime<Utc>,
}

impl RunHistory {
    /// Create an empty run with the given logical timestamp.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            time,
        }
    }

    /// Record an event for a key, replacing any earlier event for the same
    /// key in this run.
    pub fn insert(&mut self, key: AlertKey, event: Event) {
        if let Some(slot) = self.events.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = event;
        } else {
            self.events.push((key, event));
        }
    }

    /// Look up the event for a key.
    #[must_use]
    pub fn get(&self, key: &AlertKey) -> Option<&Event> {
        self.events.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// Iterate events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(AlertKey, Event)> {
        self.events.iter()
    }

    /// Number of keys in this run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the run carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
