//! Time-windowed manual suppression of notifications.
//!
//! Silences only gate delivery; incident bookkeeping always advances
//! underneath them, so the true state is visible (and notifiable) the moment
//! a window ends.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::AlertKey;

/// A user-defined suppression window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Silence {
    /// Stable identifier, returned from `add` and used for delete
    pub id: String,
    /// Window start (inclusive)
    pub start: DateTime<Utc>,
    /// Window end (inclusive)
    pub end: DateTime<Utc>,
    /// Alert name pattern; `*` wildcards allowed
    pub alert_pattern: String,
    /// Tags that must all be present and match; values may use `*`
    pub tag_filter: BTreeMap<String, String>,
    /// Also suppress already-enqueued, undelivered notifications
    pub forced: bool,
    /// Who created the silence
    pub user: String,
    /// Free-form notes
    pub notes: String,
}

impl Silence {
    /// Whether this silence applies to a key at a point in time.
    ///
    /// Applies when the time is inside the window, the alert pattern matches
    /// the key's name, and every filter tag is present with a matching value.
    /// A missing tag is no match; an empty filter matches every key of a
    /// matching alert name.
    #[must_use]
    pub fn matches(&self, key: &AlertKey, at: DateTime<Utc>) -> bool {
        if at < self.start || at > self.end {
            return false;
        }
        if !glob_match(&self.alert_pattern, &key.name) {
            return false;
        }
        self.tag_filter.iter().all(|(tag, pattern)| {
            key.tags
                .get(tag)
                .is_some_and(|value| glob_match(pattern, value))
        })
    }

    /// Whether two silences cover the same scope (same alert pattern and
    /// tag filter) with overlapping windows.
    #[must_use]
    pub fn overlaps(&self, other: &Silence) -> bool {
        self.alert_pattern == other.alert_pattern
            && self.tag_filter == other.tag_filter
            && self.start <= other.end
            && other.start <= self.end
    }
}

/// Match a `*`-wildcard pattern against a string.
///
/// Everything except `*` is literal; an invalid pattern cannot be produced
/// since the translation escapes the rest.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    compile_glob(pattern).is_ok_and(|re| re.is_match(text))
}

/// Translate a `*`-wildcard pattern into an anchored regex.
fn compile_glob(pattern: &str) -> Result<Regex, EngineError> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let translated = format!("^{}$", escaped.join(".*"));
    Regex::new(&translated)
        .map_err(|e| EngineError::Validation(format!("invalid pattern {pattern:?}: {e}")))
}

/// Parse a `k=v,k2=v2` tag filter string.
fn parse_tag_filter(filter: &str) -> Result<BTreeMap<String, String>, EngineError> {
    let mut tags = BTreeMap::new();
    for pair in filter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (tag, value) = pair.split_once('=').ok_or_else(|| {
            EngineError::Validation(format!("tag filter entry {pair:?} is not k=v"))
        })?;
        if tag.is_empty() {
            return Err(EngineError::Validation(format!(
                "tag filter entry {pair:?} has an empty tag name"
            )));
        }
        tags.insert(tag.to_string(), value.to_string());
    }
    Ok(tags)
}

/// Read-mostly store of active silences.
#[derive(Debug, Default)]
pub struct SilenceStore {
    silences: HashMap<String, Silence>,
}

impl SilenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records.
    #[must_use]
    pub fn from_records(records: Vec<Silence>) -> Self {
        Self {
            silences: records.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    /// Create a silence.
    ///
    /// Fails with a validation error when the window or patterns are
    /// malformed, or with a conflict error when an overlapping silence for
    /// the same scope exists and `confirm` was not passed.
    pub fn add(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        alert_pattern: &str,
        tag_filter: &str,
        forced: bool,
        confirm: bool,
        user: &str,
        notes: &str,
    ) -> Result<String, EngineError> {
        if end <= start {
            return Err(EngineError::Validation(format!(
                "silence window end {end} is not after start {start}"
            )));
        }
        if alert_pattern.is_empty() {
            return Err(EngineError::Validation(
                "silence alert pattern is empty".to_string(),
            ));
        }
        compile_glob(alert_pattern)?;
        let tags = parse_tag_filter(tag_filter)?;
        for pattern in tags.values() {
            compile_glob(pattern)?;
        }

        let silence = Silence {
            id: Uuid::new_v4().to_string(),
            start,
            end,
            alert_pattern: alert_pattern.to_string(),
            tag_filter: tags,
            forced,
            user: user.to_string(),
            notes: notes.to_string(),
        };

        if !confirm {
            let overlapping: Vec<String> = self
                .silences
                .values()
                .filter(|existing| existing.overlaps(&silence))
                .map(|existing| existing.id.clone())
                .collect();
            if !overlapping.is_empty() {
                return Err(EngineError::Conflict { overlapping });
            }
        }

        debug!(
            id = %silence.id,
            alert = %silence.alert_pattern,
            forced = silence.forced,
            "Silence added"
        );

        let id = silence.id.clone();
        self.silences.insert(id.clone(), silence);
        Ok(id)
    }

    /// Delete a silence before its window ends.
    pub fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        self.silences
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("no silence {id}")))
    }

    /// Drop silences whose windows have ended.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let before = self.silences.len();
        self.silences.retain(|_, s| s.end >= now);
        let expired = before - self.silences.len();
        if expired > 0 {
            debug!(expired, "Expired silences removed");
        }
    }

    /// First silence matching a key at a point in time.
    #[must_use]
    pub fn matching(&self, key: &AlertKey, at: DateTime<Utc>) -> Option<&Silence> {
        self.silences.values().find(|s| s.matches(key, at))
    }

    /// Whether any silence suppresses the key at a point in time.
    #[must_use]
    pub fn is_silenced(&self, key: &AlertKey, at: DateTime<Utc>) -> bool {
        self.matching(key, at).is_some()
    }

    /// Snapshot all records for persistence.
    #[must_use]
    pub fn records(&self) -> Vec<Silence> {
        let mut records: Vec<Silence> = self.silences.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of active silences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.silences.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.silences.is_empty()
    }
}
