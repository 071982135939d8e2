//! Batching of unknown results into per-alert digest groups.
//!
//! An evaluation outage typically marks many keys unknown at once; paging
//! once per key would storm the recipient. The grouper collects the keys
//! that went unknown in a run, one group per alert definition, so the run
//! processor can enqueue a single digest notification per definition.

use crate::model::AlertKey;

/// One alert definition's unknown keys for a run, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGroup {
    /// Alert definition name
    pub alert: String,
    /// Affected keys, ordered as they appeared in the run
    pub keys: Vec<AlertKey>,
}

/// Collects unknown keys for one run.
#[derive(Debug, Default)]
pub struct UnknownGrouper {
    groups: Vec<UnknownGroup>,
}

impl UnknownGrouper {
    /// Create an empty grouper. One grouper instance covers one run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key that transitioned into unknown this run.
    pub fn add(&mut self, key: AlertKey) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.alert == key.name) {
            if !group.keys.contains(&key) {
                group.keys.push(key);
            }
        } else {
            self.groups.push(UnknownGroup {
                alert: key.name.clone(),
                keys: vec![key],
            });
        }
    }

    /// Consume the grouper, yielding one group per alert definition in the
    /// order definitions first appeared in the run.
    #[must_use]
    pub fn into_groups(self) -> Vec<UnknownGroup> {
        self.groups
    }
}
