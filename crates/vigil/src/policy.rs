//! Flap-aware notification decisioning.
//!
//! A pure function of the incident as it stood before the new result, the
//! new status, and the auto-close policy. No store access, no clocks of its
//! own: everything it needs comes in as arguments, which is what makes the
//! flap rules directly testable.

use chrono::{DateTime, Duration, Utc};

use crate::incident::Incident;
use crate::model::Status;

/// Outcome of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// A human must be notified at the new severity
    Notify,
    /// The incident should be closed (auto-close policy fired)
    Clear,
    /// Nothing to do beyond bookkeeping
    NoAction,
}

/// Decide whether one evaluation result warrants a notification.
///
/// `before` is the incident record *prior* to applying the new status
/// (`None` for a first-seen key). Rules, in priority order:
///
/// - first transition from not-open to abnormal notifies (opens the incident);
/// - while open, a severity strictly above the last *notified* severity
///   notifies (escalation, and the first notification after a silence
///   expires, since suppressed decisions never update the notified severity);
/// - any other abnormal result while open is flap-suppressed, including
///   returning to the same severity after dipping to normal;
/// - normal never notifies; it closes the incident only when the auto-close
///   grace policy is configured and the incident has been resolved at least
///   that long (default: never, close is explicit);
/// - unknown results carry no severity and are routed through the unknown
///   grouper instead of this function.
#[must_use]
pub fn decide(
    before: Option<&Incident>,
    new: Status,
    auto_close_grace: Option<Duration>,
    now: DateTime<Utc>,
) -> PolicyAction {
    match new {
        Status::Warning | Status::Critical => match before {
            Some(incident) if incident.open => {
                if new.more_severe_than(incident.last_notified_status) {
                    PolicyAction::Notify
                } else {
                    PolicyAction::NoAction
                }
            }
            _ => PolicyAction::Notify,
        },
        Status::Normal => {
            if let (Some(incident), Some(grace)) = (before, auto_close_grace) {
                if incident.open {
                    if let Some(since) = incident.resolved_since {
                        if now - since >= grace {
                            return PolicyAction::Clear;
                        }
                    }
                }
            }
            PolicyAction::NoAction
        }
        Status::Unknown => PolicyAction::NoAction,
    }
}
