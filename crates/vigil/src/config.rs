//! Engine configuration: alert definitions, notification chains, templates,
//! and dispatch tuning.
//!
//! The expression/DSL side of configuration lives in the evaluation engine;
//! this module only carries what the alerting core needs: which notification
//! chain each alert routes to, what the chains look like, and the templates
//! used to render outbound payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Alert definitions by name
    #[serde(default)]
    pub alerts: HashMap<String, AlertDef>,
    /// Notification definitions by name
    #[serde(default)]
    pub notifications: HashMap<String, NotificationDef>,
    /// Template definitions by name
    #[serde(default)]
    pub templates: HashMap<String, TemplateDef>,
    /// Template used for grouped unknown notifications
    pub unknown_template: Option<String>,
    /// Path for the durable state snapshot; in-memory only when unset
    pub state_file: Option<PathBuf>,
    /// Dispatch loop tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// An alert definition's notification routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertDef {
    /// Notification chain for warning-severity incidents
    pub warn_notification: Option<String>,
    /// Notification chain for critical-severity incidents
    pub crit_notification: Option<String>,
    /// Notification chain for grouped unknown results; unknown keys of an
    /// alert without one are dropped from the pass
    pub unknown_notification: Option<String>,
    /// Template for incident notifications
    pub template: Option<String>,
}

impl AlertDef {
    /// Notification chain name for an incident at the given severity rank.
    ///
    /// Critical incidents fall back to the warn chain when no crit chain is
    /// configured, so a worsening incident is never silently unroutable.
    #[must_use]
    pub fn notification_for(&self, severity: u8) -> Option<&str> {
        if severity >= 2 {
            self.crit_notification
                .as_deref()
                .or(self.warn_notification.as_deref())
        } else {
            self.warn_notification.as_deref()
        }
    }
}

/// A notification definition: where to deliver and how to escalate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationDef {
    /// Webhook URL to POST rendered payloads to
    pub post: Option<String>,
    /// Print the rendered subject to stdout
    #[serde(default)]
    pub print: bool,
    /// Next chain link, paged when this one goes unacknowledged
    pub next: Option<String>,
    /// Seconds to wait for an acknowledgement before escalating to `next`
    pub timeout_secs: Option<u64>,
}

/// A template definition for rendering notification payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDef {
    /// Subject template (handlebars)
    pub subject: String,
    /// Body template (handlebars); empty body is allowed
    #[serde(default)]
    pub body: String,
}

/// Dispatch/retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delivery attempts per notification before it is dropped
    pub max_attempts: u32,
    /// Base retry backoff in seconds; doubles each failed attempt
    pub backoff_secs: u64,
    /// Upper bound on the computed backoff
    pub backoff_cap_secs: u64,
    /// Per-attempt send timeout for webhook deliveries
    pub send_timeout_secs: u64,
    /// When set, an open incident that has been back to normal for this many
    /// seconds is closed automatically. Default is never: incidents stay
    /// open until an explicit close.
    pub auto_close_grace_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 30,
            backoff_cap_secs: 600,
            send_timeout_secs: 10,
            auto_close_grace_secs: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            EngineError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references between alerts, notifications, and templates.
    ///
    /// A dangling reference here is a hard error at startup; the dispatcher
    /// also tolerates missing definitions at runtime (surfacing them as
    /// undeliverable events) so one bad entry cannot block the loop.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, alert) in &self.alerts {
            for chain in [
                &alert.warn_notification,
                &alert.crit_notification,
                &alert.unknown_notification,
            ]
            .into_iter()
            .flatten()
            {
                if !self.notifications.contains_key(chain) {
                    return Err(EngineError::Configuration(format!(
                        "alert {name} references unknown notification {chain}"
                    )));
                }
            }
            if let Some(tpl) = &alert.template {
                if !self.templates.contains_key(tpl) {
                    return Err(EngineError::Configuration(format!(
                        "alert {name} references unknown template {tpl}"
                    )));
                }
            }
        }

        for (name, notification) in &self.notifications {
            if let Some(next) = &notification.next {
                if !self.notifications.contains_key(next) {
                    return Err(EngineError::Configuration(format!(
                        "notification {name} references unknown next chain {next}"
                    )));
                }
                if notification.timeout_secs.is_none() {
                    return Err(EngineError::Configuration(format!(
                        "notification {name} has a next chain but no timeout_secs"
                    )));
                }
            }
        }

        if let Some(tpl) = &self.unknown_template {
            if !self.templates.contains_key(tpl) {
                return Err(EngineError::Configuration(format!(
                    "unknown_template references unknown template {tpl}"
                )));
            }
        }

        Ok(())
    }
}
