//! The alerting engine: run ingestion, decisioning, dispatch, and actions.
//!
//! One engine owns the incident store, silence store, and notification
//! queue behind a single write lock; a `run_history` pass, a
//! `check_notifications` cycle, and an `action` call are each atomic with
//! respect to one another. Network sends never happen under the lock: the
//! dispatch cycle snapshots what it needs, releases the lock, then renders
//! and delivers.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use notify::{ConsoleSender, Sender, WebhookSender};

use crate::config::{Config, TemplateDef};
use crate::dispatch::{
    coalesce, Escalation, NotificationKind, NotificationQueue, PendingNotification,
};
use crate::error::EngineError;
use crate::events::{DeliveryEvent, DeliveryLog, DeliveryOutcome};
use crate::incident::{Incident, IncidentStore};
use crate::model::{AlertKey, Event, RunHistory, Status};
use crate::policy::{self, PolicyAction};
use crate::render::{IncidentContext, Renderer, UnknownContext};
use crate::silence::{glob_match, Silence, SilenceStore};
use crate::state::{self, StateSnapshot};
use crate::unknown::UnknownGrouper;

/// Subject used when an alert has no template configured.
const DEFAULT_INCIDENT_SUBJECT: &str = "{{status}}: {{key}}";

/// Subject used when no unknown template is configured.
const DEFAULT_UNKNOWN_SUBJECT: &str = "{{name}}: {{count}} unknown alerts";

/// User-initiated incident lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Close the incident; the next abnormal transition notifies afresh
    Close,
    /// Remove the incident's history entirely
    Forget,
    /// Clear the needs-ack escalation timers, keep severity bookkeeping
    Acknowledge,
    /// Forget plus removal of the key's queued notifications
    Purge,
}

/// External evaluation engine seam: produces per-key events for an alert
/// definition at a point in time.
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate one alert definition.
    async fn evaluate(
        &self,
        alert: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<(AlertKey, Event)>, EngineError>;
}

/// Mutable engine state behind the single write lock.
struct EngineState {
    incidents: IncidentStore,
    silences: SilenceStore,
    queue: NotificationQueue,
    last_run_time: Option<DateTime<Utc>>,
}

/// A delivery lifted out of the queue, ready to render and send outside
/// the lock.
struct PreparedDelivery {
    pending: PendingNotification,
    context: Value,
}

/// The alerting core.
pub struct Engine {
    config: Config,
    renderer: Renderer,
    senders: HashMap<String, Vec<Arc<dyn Sender>>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    state: RwLock<EngineState>,
    log: RwLock<DeliveryLog>,
}

impl Engine {
    /// Create an engine from a validated configuration, restoring durable
    /// state from the configured state file when one exists. Safe to call
    /// repeatedly at startup.
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;

        let mut senders: HashMap<String, Vec<Arc<dyn Sender>>> = HashMap::new();
        for (name, def) in &config.notifications {
            let mut channels: Vec<Arc<dyn Sender>> = Vec::new();
            if let Some(url) = &def.post {
                channels.push(Arc::new(WebhookSender::with_timeout(
                    url.clone(),
                    config.dispatch.send_timeout_secs,
                )));
            }
            if def.print {
                channels.push(Arc::new(ConsoleSender::new()));
            }
            if channels.is_empty() {
                warn!(notification = %name, "Notification has no delivery channels");
            }
            senders.insert(name.clone(), channels);
        }

        let snapshot = match &config.state_file {
            Some(path) => state::load(path)?.unwrap_or_default(),
            None => StateSnapshot::default(),
        };

        info!(
            alerts = config.alerts.len(),
            notifications = config.notifications.len(),
            incidents = snapshot.incidents.len(),
            silences = snapshot.silences.len(),
            "Engine initialized"
        );

        Ok(Self {
            config,
            renderer: Renderer::new(),
            senders,
            evaluator: None,
            state: RwLock::new(EngineState {
                incidents: IncidentStore::from_records(snapshot.incidents),
                silences: SilenceStore::from_records(snapshot.silences),
                queue: NotificationQueue::new(),
                last_run_time: snapshot.last_run_time,
            }),
            log: RwLock::new(DeliveryLog::new()),
        })
    }

    /// Attach the external evaluation engine used by [`Engine::check`].
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Consume one evaluation pass. The sole entry point that advances
    /// incident state.
    ///
    /// The whole pass runs under the write lock: concurrent runs cannot
    /// interleave per-key transitions. One key's processing failure is
    /// logged and does not stop the rest of the pass.
    pub async fn run_history(&self, run: &RunHistory) -> Result<(), EngineError> {
        let grace = self.auto_close_grace();
        let mut grouper = UnknownGrouper::new();

        let mut st = self.state.write().await;
        for (key, event) in run.iter() {
            self.process_key(&mut st, key, event, run.time, grace, &mut grouper);
        }

        for group in grouper.into_groups() {
            let Some(alert_def) = self.config.alerts.get(&group.alert) else {
                continue;
            };
            let Some(chain) = alert_def.unknown_notification.as_deref() else {
                debug!(
                    alert = %group.alert,
                    keys = group.keys.len(),
                    "No unknown notification configured; dropping unknown keys"
                );
                continue;
            };
            let keys: Vec<AlertKey> = group
                .keys
                .into_iter()
                .filter(|k| !st.silences.is_silenced(k, run.time))
                .collect();
            if keys.is_empty() {
                continue;
            }
            info!(
                alert = %group.alert,
                notification = chain,
                keys = keys.len(),
                "Unknown digest enqueued"
            );
            st.queue.enqueue(PendingNotification {
                notification: chain.to_string(),
                alert: group.alert,
                keys,
                kind: NotificationKind::UnknownGroup,
                enqueued_at: run.time,
                attempt: 0,
                next_attempt_at: run.time,
            });
        }

        st.last_run_time = Some(run.time);
        self.save_state(&st)
    }

    /// Process a single key of a run. Decision first (against the record as
    /// it stood before this run), bookkeeping second, enqueue last.
    fn process_key(
        &self,
        st: &mut EngineState,
        key: &AlertKey,
        event: &Event,
        time: DateTime<Utc>,
        grace: Option<Duration>,
        grouper: &mut UnknownGrouper,
    ) {
        let action = policy::decide(st.incidents.get(key), event.status, grace, time);

        let went_unknown = {
            let incident = st.incidents.get_or_create(key);
            incident.transition(event.status, time);
            event.status == Status::Unknown && incident.unevaluated_count == 1
        };

        match action {
            PolicyAction::Clear => {
                // Auto-close grace fired; same semantics as an explicit close.
                if st.incidents.close(key, time).is_ok() {
                    st.queue.clear_escalations(key);
                    info!(key = %key, "Incident auto-closed after grace period");
                }
            }
            PolicyAction::Notify => {
                let Some(severity) = event.status.severity() else {
                    return;
                };
                let Some(alert_def) = self.config.alerts.get(&key.name) else {
                    debug!(key = %key, "No alert definition; state tracked, nothing routed");
                    return;
                };
                let Some(chain) = alert_def.notification_for(severity) else {
                    debug!(
                        key = %key,
                        status = %event.status,
                        "No notification chain for severity"
                    );
                    return;
                };
                if st.silences.is_silenced(key, time) {
                    debug!(key = %key, "Notification suppressed by silence");
                    return;
                }
                st.queue.enqueue(PendingNotification {
                    notification: chain.to_string(),
                    alert: key.name.clone(),
                    keys: vec![key.clone()],
                    kind: NotificationKind::Incident {
                        status: event.status,
                    },
                    enqueued_at: time,
                    attempt: 0,
                    next_attempt_at: time,
                });
                st.incidents
                    .get_or_create(key)
                    .mark_notified(event.status, time);
                info!(
                    key = %key,
                    status = %event.status,
                    notification = chain,
                    "Notification enqueued"
                );
            }
            PolicyAction::NoAction => {}
        }

        if went_unknown {
            grouper.add(key.clone());
        }
    }

    /// Flush due notifications to their delivery channels.
    ///
    /// Invoked on a fixed interval by the caller. Silences are re-checked at
    /// dispatch time, so a silence created after enqueue still suppresses.
    /// Delivery failures are retried with backoff and never propagate.
    pub async fn check_notifications(&self) {
        let now = Utc::now();
        let dispatch = &self.config.dispatch;

        let mut deliveries: Vec<PreparedDelivery> = Vec::new();
        let mut immediate_events: Vec<DeliveryEvent> = Vec::new();
        {
            let mut st = self.state.write().await;
            st.silences.expire(now);

            // Fire due needs-ack escalations for incidents still hot.
            for esc in st.queue.take_due_escalations(now) {
                let still_hot = esc.keys.iter().any(|k| {
                    st.incidents
                        .get(k)
                        .is_some_and(|i| i.open && !i.acknowledged)
                });
                if !still_hot {
                    continue;
                }
                info!(
                    notification = %esc.next_notification,
                    alert = %esc.alert,
                    "Escalating unacknowledged incident to next chain link"
                );
                st.queue.enqueue(PendingNotification {
                    notification: esc.next_notification,
                    alert: esc.alert,
                    keys: esc.keys,
                    kind: NotificationKind::Incident { status: esc.status },
                    enqueued_at: now,
                    attempt: 0,
                    next_attempt_at: now,
                });
            }

            for mut pending in coalesce(st.queue.take_due(now)) {
                let unsilenced: Vec<AlertKey> = pending
                    .keys
                    .iter()
                    .filter(|k| !st.silences.is_silenced(k, now))
                    .cloned()
                    .collect();
                if unsilenced.is_empty() {
                    immediate_events.push(Self::event(&pending, None, DeliveryOutcome::Silenced, now));
                    continue;
                }
                pending.keys = unsilenced;
                let context = Self::build_context(&st.incidents, &pending, now);
                deliveries.push(PreparedDelivery { pending, context });
            }
        }

        if !immediate_events.is_empty() {
            let mut log = self.log.write().await;
            for event in immediate_events {
                log.record(event);
            }
        }

        // Render and send without the lock.
        let mut requeue: Vec<PendingNotification> = Vec::new();
        let mut arm: Vec<Escalation> = Vec::new();
        for delivery in deliveries {
            let outcome = self.deliver(&delivery, now, &mut arm).await;
            let (event, failed) = outcome;
            let retry = failed && {
                let attempts_made = delivery.pending.attempt + 1;
                attempts_made < dispatch.max_attempts
            };
            if retry {
                requeue.push(delivery.pending.clone());
            }
            self.log.write().await.record(event);
        }

        if !requeue.is_empty() || !arm.is_empty() {
            let mut st = self.state.write().await;
            for pending in requeue {
                st.queue.requeue_failed(pending, dispatch, now);
            }
            for escalation in arm {
                st.queue.arm_escalation(escalation);
            }
        }
    }

    /// Render and send one prepared delivery. Returns the delivery event to
    /// record and whether the attempt failed (and may be retried).
    async fn deliver(
        &self,
        delivery: &PreparedDelivery,
        now: DateTime<Utc>,
        arm: &mut Vec<Escalation>,
    ) -> (DeliveryEvent, bool) {
        let pending = &delivery.pending;

        let Some(channels) = self.senders.get(&pending.notification) else {
            // One bad definition must not block the cycle.
            let reason = format!("unknown notification definition {}", pending.notification);
            warn!(notification = %pending.notification, "Undeliverable: {reason}");
            return (
                Self::event(pending, None, DeliveryOutcome::Undeliverable { reason }, now),
                false,
            );
        };
        if channels.is_empty() {
            let reason = format!("notification {} has no channels", pending.notification);
            return (
                Self::event(pending, None, DeliveryOutcome::Undeliverable { reason }, now),
                false,
            );
        }

        let template = self.resolve_template(pending);
        let payload = match self.renderer.render(&template, &delivery.context) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    notification = %pending.notification,
                    error = %e,
                    "Undeliverable: template render failed"
                );
                return (
                    Self::event(
                        pending,
                        None,
                        DeliveryOutcome::Undeliverable {
                            reason: e.to_string(),
                        },
                        now,
                    ),
                    false,
                );
            }
        };

        let results = notify::send_all(channels, &payload).await;
        let failures: Vec<String> = results
            .iter()
            .filter_map(|(label, r)| r.as_ref().err().map(|e| format!("{label}: {e}")))
            .collect();

        if failures.is_empty() {
            if let NotificationKind::Incident { status } = pending.kind {
                self.maybe_arm_escalation(pending, status, now, arm);
            }
            (
                Self::event(pending, Some(payload.subject), DeliveryOutcome::Sent, now),
                false,
            )
        } else {
            let attempts_made = pending.attempt + 1;
            let error = failures.join("; ");
            if attempts_made >= self.config.dispatch.max_attempts {
                warn!(
                    notification = %pending.notification,
                    attempts = attempts_made,
                    "Notification dropped after exhausting retries"
                );
                (
                    Self::event(
                        pending,
                        Some(payload.subject),
                        DeliveryOutcome::Dropped {
                            attempts: attempts_made,
                        },
                        now,
                    ),
                    true,
                )
            } else {
                debug!(
                    notification = %pending.notification,
                    attempt = attempts_made,
                    error = %error,
                    "Delivery failed; will retry"
                );
                (
                    Self::event(
                        pending,
                        Some(payload.subject),
                        DeliveryOutcome::Failed {
                            attempt: attempts_made,
                            error,
                        },
                        now,
                    ),
                    true,
                )
            }
        }
    }

    /// Arm the needs-ack escalation timer when the definition chains.
    fn maybe_arm_escalation(
        &self,
        pending: &PendingNotification,
        status: Status,
        now: DateTime<Utc>,
        arm: &mut Vec<Escalation>,
    ) {
        let Some(def) = self.config.notifications.get(&pending.notification) else {
            return;
        };
        let (Some(next), Some(timeout)) = (&def.next, def.timeout_secs) else {
            return;
        };
        arm.push(Escalation {
            next_notification: next.clone(),
            alert: pending.alert.clone(),
            keys: pending.keys.clone(),
            status,
            due_at: now + Duration::seconds(timeout as i64),
        });
    }

    /// Resolve the template for a pending notification, falling back to the
    /// built-in defaults when none is configured.
    fn resolve_template(&self, pending: &PendingNotification) -> TemplateDef {
        let configured = match pending.kind {
            NotificationKind::Incident { .. } => self
                .config
                .alerts
                .get(&pending.alert)
                .and_then(|a| a.template.as_ref()),
            NotificationKind::UnknownGroup => self.config.unknown_template.as_ref(),
        };
        configured
            .and_then(|name| self.config.templates.get(name))
            .cloned()
            .unwrap_or_else(|| TemplateDef {
                subject: match pending.kind {
                    NotificationKind::Incident { .. } => DEFAULT_INCIDENT_SUBJECT.to_string(),
                    NotificationKind::UnknownGroup => DEFAULT_UNKNOWN_SUBJECT.to_string(),
                },
                body: String::new(),
            })
    }

    /// Build the render context for a pending notification from an incident
    /// snapshot. Runs under the lock; rendering itself does not.
    fn build_context(
        incidents: &IncidentStore,
        pending: &PendingNotification,
        now: DateTime<Utc>,
    ) -> Value {
        match pending.kind {
            NotificationKind::Incident { status } => {
                let first = &pending.keys[0];
                let incident = incidents.get(first);
                let context = IncidentContext {
                    alert: pending.alert.clone(),
                    key: first.to_string(),
                    keys: pending.keys.iter().map(ToString::to_string).collect(),
                    tags: first.tags.clone(),
                    status: status.as_str().to_string(),
                    last_abnormal: incident
                        .and_then(|i| i.last_abnormal_status)
                        .map(|s| s.as_str().to_string()),
                    time: now.to_rfc3339(),
                };
                serde_json::to_value(context).unwrap_or_default()
            }
            NotificationKind::UnknownGroup => {
                let context = UnknownContext {
                    name: pending.alert.clone(),
                    group: pending.keys.iter().map(ToString::to_string).collect(),
                    count: pending.keys.len(),
                    time: now.to_rfc3339(),
                };
                serde_json::to_value(context).unwrap_or_default()
            }
        }
    }

    fn event(
        pending: &PendingNotification,
        subject: Option<String>,
        outcome: DeliveryOutcome,
        time: DateTime<Utc>,
    ) -> DeliveryEvent {
        DeliveryEvent {
            notification: pending.notification.clone(),
            alert: pending.alert.clone(),
            keys: pending.keys.clone(),
            subject,
            outcome,
            time,
        }
    }

    /// Apply a user-initiated lifecycle action to an incident.
    pub async fn action(
        &self,
        user: &str,
        message: &str,
        kind: ActionKind,
        key: &AlertKey,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut st = self.state.write().await;

        match kind {
            ActionKind::Close => {
                st.incidents.close(key, now)?;
                st.queue.clear_escalations(key);
            }
            ActionKind::Acknowledge => {
                st.incidents.acknowledge(key)?;
                st.queue.clear_escalations(key);
            }
            ActionKind::Forget => {
                st.incidents.forget(key)?;
            }
            ActionKind::Purge => {
                st.incidents.forget(key)?;
                st.queue.purge_key(key);
            }
        }

        info!(user, message, action = ?kind, key = %key, "Action applied");
        self.save_state(&st)
    }

    /// Create a manual suppression window.
    ///
    /// A forced silence immediately purges matching already-enqueued
    /// notifications; they surface as silenced delivery events.
    pub async fn add_silence(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        alert_pattern: &str,
        tag_filter: &str,
        forced: bool,
        confirm: bool,
        user: &str,
        notes: &str,
    ) -> Result<String, EngineError> {
        let mut st = self.state.write().await;
        let id = st
            .silences
            .add(start, end, alert_pattern, tag_filter, forced, confirm, user, notes)?;

        let mut purged_events = Vec::new();
        if forced {
            let now = Utc::now();
            let inner = &mut *st;
            for pending in inner.queue.purge_silenced(&inner.silences, now) {
                purged_events.push(Self::event(&pending, None, DeliveryOutcome::Silenced, now));
            }
        }

        self.save_state(&st)?;
        drop(st);

        if !purged_events.is_empty() {
            let mut log = self.log.write().await;
            for event in purged_events {
                log.record(event);
            }
        }

        Ok(id)
    }

    /// Delete a silence before its window ends.
    pub async fn delete_silence(&self, id: &str) -> Result<(), EngineError> {
        let mut st = self.state.write().await;
        st.silences.delete(id)?;
        self.save_state(&st)
    }

    /// Run an on-demand evaluation pass over configured alerts matching the
    /// filter (glob on alert name, `None` for all) and feed the result
    /// through `run_history`.
    pub async fn check(
        &self,
        filter: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<RunHistory, EngineError> {
        let evaluator = self
            .evaluator
            .clone()
            .ok_or_else(|| EngineError::Configuration("no evaluator configured".to_string()))?;

        let mut names: Vec<&String> = self.config.alerts.keys().collect();
        names.sort();

        let mut run = RunHistory::new(at);
        for name in names {
            if let Some(pattern) = filter {
                if !glob_match(pattern, name) {
                    continue;
                }
            }
            match evaluator.evaluate(name, at).await {
                Ok(events) => {
                    for (key, event) in events {
                        run.insert(key, event);
                    }
                }
                Err(e) => {
                    // One failing alert must not block the pass.
                    warn!(alert = %name, error = %e, "Evaluation failed");
                }
            }
        }

        self.run_history(&run).await?;
        Ok(run)
    }

    /// Snapshot of one incident record.
    pub async fn incident(&self, key: &AlertKey) -> Option<Incident> {
        self.state.read().await.incidents.get(key).cloned()
    }

    /// Active silences.
    pub async fn silences(&self) -> Vec<Silence> {
        self.state.read().await.silences.records()
    }

    /// Queued (not yet dispatched) notification count.
    pub async fn pending_count(&self) -> usize {
        self.state.read().await.queue.pending_count()
    }

    /// All delivery events recorded so far.
    pub async fn delivery_events(&self) -> Vec<DeliveryEvent> {
        self.log.read().await.events().to_vec()
    }

    /// Count of successfully sent deliveries.
    pub async fn sent_count(&self) -> usize {
        self.log.read().await.sent_count()
    }

    /// Subscribe to the live delivery-outcome stream.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<DeliveryEvent> {
        self.log.write().await.subscribe()
    }

    /// Logical timestamp of the last processed run.
    pub async fn last_run_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_run_time
    }

    fn auto_close_grace(&self) -> Option<Duration> {
        self.config
            .dispatch
            .auto_close_grace_secs
            .map(|secs| Duration::seconds(secs as i64))
    }

    /// Persist durable state when a state file is configured.
    fn save_state(&self, st: &EngineState) -> Result<(), EngineError> {
        let Some(path) = &self.config.state_file else {
            return Ok(());
        };
        let snapshot = StateSnapshot {
            incidents: st.incidents.records(),
            silences: st.silences.records(),
            last_run_time: st.last_run_time,
        };
        state::save(path, &snapshot)
    }
}
