//! Template rendering for notification payloads.

use handlebars::Handlebars;
use serde::Serialize;

use crate::config::TemplateDef;
use crate::error::EngineError;

/// Renders configured templates into subject/body pairs.
pub struct Renderer {
    handlebars: Handlebars<'static>,
}

impl Renderer {
    /// Create a renderer. Strict mode is off so templates may reference
    /// context fields that are absent for a given notification kind.
    #[must_use]
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    /// Render a template definition against a context.
    pub fn render<C: Serialize>(
        &self,
        template: &TemplateDef,
        context: &C,
    ) -> Result<notify::Payload, EngineError> {
        let subject = self.handlebars.render_template(&template.subject, context)?;
        let body = if template.body.is_empty() {
            String::new()
        } else {
            self.handlebars.render_template(&template.body, context)?
        };
        Ok(notify::Payload { subject, body })
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render context for a single-incident notification.
#[derive(Debug, Serialize)]
pub struct IncidentContext {
    /// Alert definition name
    pub alert: String,
    /// Rendered alert key (`name{k=v,...}`)
    pub key: String,
    /// Every key covered by the delivery (one unless coalesced)
    pub keys: Vec<String>,
    /// Tag set of the key
    pub tags: std::collections::BTreeMap<String, String>,
    /// Status being notified
    pub status: String,
    /// Highest severity reached since the incident opened
    pub last_abnormal: Option<String>,
    /// Run timestamp
    pub time: String,
}

/// Render context for a grouped unknown notification.
#[derive(Debug, Serialize)]
pub struct UnknownContext {
    /// Alert definition name
    pub name: String,
    /// Affected keys in run order
    pub group: Vec<String>,
    /// Number of affected keys
    pub count: usize,
    /// Run timestamp
    pub time: String,
}
