//! Durable state snapshots.
//!
//! Incidents, silences, and the last-processed run timestamp survive
//! restarts; the queue and escalation timers are transient by design. The
//! snapshot is written atomically (temp file + rename) so a crash mid-write
//! cannot corrupt the previous state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::EngineError;
use crate::incident::Incident;
use crate::silence::Silence;

/// Everything the engine persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// All incident records
    #[serde(default)]
    pub incidents: Vec<Incident>,
    /// All active silences
    #[serde(default)]
    pub silences: Vec<Silence>,
    /// Logical timestamp of the last processed run
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Load a snapshot. A missing file is a fresh start, not an error.
pub fn load(path: &Path) -> Result<Option<StateSnapshot>, EngineError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::State(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        }
    };

    let snapshot: StateSnapshot = serde_json::from_str(&raw).map_err(|e| {
        EngineError::State(format!("failed to parse {}: {e}", path.display()))
    })?;

    debug!(
        path = %path.display(),
        incidents = snapshot.incidents.len(),
        silences = snapshot.silences.len(),
        "State loaded"
    );

    Ok(Some(snapshot))
}

/// Write a snapshot atomically.
pub fn save(path: &Path, snapshot: &StateSnapshot) -> Result<(), EngineError> {
    let raw = serde_json::to_string_pretty(snapshot)
        .map_err(|e| EngineError::State(format!("failed to serialize state: {e}")))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, raw).map_err(|e| {
        EngineError::State(format!("failed to write {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        EngineError::State(format!("failed to move state into {}: {e}", path.display()))
    })?;

    debug!(path = %path.display(), "State saved");
    Ok(())
}
