//! End-to-end properties of the alerting engine: flap suppression,
//! escalation, silences, unknown grouping, retry, and durable state.

use chrono::{Duration, Utc};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil::{
    ActionKind, AlertKey, Config, DeliveryOutcome, Engine, EngineError, Event, RunHistory, Status,
};

fn parse_config(raw: &str) -> Config {
    toml::from_str(raw).expect("test config parses")
}

/// Feed a single-key run at the given status through the engine.
async fn run_status(engine: &Engine, key: &AlertKey, status: Status) {
    let now = Utc::now();
    let mut run = RunHistory::new(now);
    run.insert(key.clone(), Event::new(status, now));
    engine.run_history(&run).await.expect("run history");
}

/// Feed a run, dispatch, and return how many deliveries went out for it.
async fn step(engine: &Engine, key: &AlertKey, status: Status) -> usize {
    let before = engine.sent_count().await;
    run_status(engine, key, status).await;
    engine.check_notifications().await;
    engine.sent_count().await - before
}

#[tokio::test]
async fn test_flapping_produces_one_notification() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        crit_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    // First warning notifies.
    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
    // Flapping between normal and warning is suppressed.
    assert_eq!(step(&engine, &key, Status::Normal).await, 0);
    assert_eq!(step(&engine, &key, Status::Warning).await, 0);
    assert_eq!(step(&engine, &key, Status::Normal).await, 0);
    // Escalation to critical re-alerts.
    assert_eq!(step(&engine, &key, Status::Critical).await, 1);
    // Dip and return at the notified severity stays quiet.
    assert_eq!(step(&engine, &key, Status::Normal).await, 0);
    assert_eq!(step(&engine, &key, Status::Critical).await, 0);

    // Close the incident, so it should notify next time.
    engine
        .action("tester", "", ActionKind::Close, &key)
        .await
        .unwrap();
    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
}

#[tokio::test]
async fn test_deleted_silence_stops_suppressing() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    let now = Utc::now();
    let id = engine
        .add_silence(
            now - Duration::hours(1),
            now + Duration::hours(1),
            "a",
            "",
            false,
            true,
            "tester",
            "",
        )
        .await
        .unwrap();
    assert_eq!(engine.silences().await.len(), 1);

    assert_eq!(step(&engine, &key, Status::Warning).await, 0);

    engine.delete_silence(&id).await.unwrap();
    assert!(engine.silences().await.is_empty());

    // The suppressed decision left the incident unnotified, so it delivers now.
    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
}

#[tokio::test]
async fn test_repeated_run_is_idempotent() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::new("a", [("host", "x")]);

    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
    // Same run again: no status change, no new delivery.
    assert_eq!(step(&engine, &key, Status::Warning).await, 0);
    assert_eq!(step(&engine, &key, Status::Warning).await, 0);
    assert!(engine.last_run_time().await.is_some());
}

#[tokio::test]
async fn test_silence_suppresses_delivery_but_state_advances() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = parse_config(&format!(
        r#"
        [templates.t]
        subject = "{{{{status}}}}"

        [notifications.n]
        post = "{}/"

        [alerts.a]
        warn_notification = "n"
        template = "t"
        "#,
        server.uri()
    ));
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    let now = Utc::now();
    engine
        .add_silence(
            now - Duration::hours(1),
            now + Duration::hours(1),
            "a",
            "",
            false,
            true,
            "tester",
            "",
        )
        .await
        .unwrap();

    run_status(&engine, &key, Status::Warning).await;
    engine.check_notifications().await;

    // Nothing was delivered, but the incident still opened.
    assert_eq!(engine.sent_count().await, 0);
    let incident = engine.incident(&key).await.unwrap();
    assert!(incident.open);
    assert_eq!(incident.current_status, Status::Warning);
    assert_eq!(incident.last_notified_status, None);
}

#[tokio::test]
async fn test_silence_round_trip_renotifies_after_expiry() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    let now = Utc::now();
    engine
        .add_silence(
            now - Duration::hours(1),
            now + Duration::seconds(1),
            "a",
            "",
            false,
            true,
            "tester",
            "",
        )
        .await
        .unwrap();

    assert_eq!(step(&engine, &key, Status::Warning).await, 0);

    // Let the window end pass; the suppressed decision never marked the
    // incident notified, so the same abnormal result now delivers.
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
}

#[tokio::test]
async fn test_silence_created_after_enqueue_still_suppresses() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Warning).await;
    assert_eq!(engine.pending_count().await, 1);

    let now = Utc::now();
    engine
        .add_silence(
            now - Duration::hours(1),
            now + Duration::hours(1),
            "a",
            "",
            false,
            true,
            "tester",
            "",
        )
        .await
        .unwrap();

    engine.check_notifications().await;
    assert_eq!(engine.sent_count().await, 0);
    let events = engine.delivery_events().await;
    assert!(events
        .iter()
        .any(|e| e.outcome == DeliveryOutcome::Silenced));
}

#[tokio::test]
async fn test_forced_silence_purges_enqueued_notifications() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Warning).await;
    assert_eq!(engine.pending_count().await, 1);

    let now = Utc::now();
    engine
        .add_silence(
            now - Duration::hours(1),
            now + Duration::hours(1),
            "a",
            "",
            true,
            true,
            "tester",
            "",
        )
        .await
        .unwrap();

    // Purged immediately, observable before any dispatch cycle.
    assert_eq!(engine.pending_count().await, 0);
    let events = engine.delivery_events().await;
    assert!(events
        .iter()
        .any(|e| e.outcome == DeliveryOutcome::Silenced));
}

#[tokio::test]
async fn test_delivered_subject_is_rendered_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string_contains("warning"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = parse_config(&format!(
        r#"
        [templates.t]
        subject = "{{{{status}}}}"

        [notifications.n]
        post = "{}/"

        [alerts.a]
        warn_notification = "n"
        template = "t"
        "#,
        server.uri()
    ));
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Warning).await;
    engine.check_notifications().await;

    assert_eq!(engine.sent_count().await, 1);
    let events = engine.delivery_events().await;
    assert_eq!(events[0].subject.as_deref(), Some("warning"));
}

#[tokio::test]
async fn test_unknown_keys_group_into_one_digest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("a: 2 unknown alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = parse_config(&format!(
        r#"
        unknown_template = "t"

        [templates.t]
        subject = "{{{{name}}}}: {{{{count}}}} unknown alerts"
        body = "{{{{#each group}}}}{{{{this}}}} {{{{/each}}}}"

        [notifications.n]
        post = "{}/"

        [alerts.a]
        crit_notification = "n"
        unknown_notification = "n"
        "#,
        server.uri()
    ));
    let engine = Engine::new(config).unwrap();

    let now = Utc::now();
    let mut run = RunHistory::new(now);
    run.insert(
        AlertKey::new("a", [("h", "x")]),
        Event::new(Status::Unknown, now),
    );
    run.insert(
        AlertKey::new("a", [("h", "y")]),
        Event::new(Status::Unknown, now),
    );
    engine.run_history(&run).await.unwrap();
    engine.check_notifications().await;

    assert_eq!(engine.sent_count().await, 1);

    // Keys still unknown next run: no fresh digest.
    engine.run_history(&run).await.unwrap();
    engine.check_notifications().await;
    assert_eq!(engine.sent_count().await, 1);
}

#[tokio::test]
async fn test_unknown_without_chain_is_dropped() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();

    let now = Utc::now();
    let mut run = RunHistory::new(now);
    run.insert(AlertKey::new("a", [("h", "x")]), Event::new(Status::Unknown, now));
    engine.run_history(&run).await.unwrap();

    assert_eq!(engine.pending_count().await, 0);
}

#[tokio::test]
async fn test_failed_delivery_retries_then_drops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = parse_config(&format!(
        r#"
        [dispatch]
        max_attempts = 2
        backoff_secs = 0

        [notifications.n]
        post = "{}/"

        [alerts.a]
        warn_notification = "n"
        "#,
        server.uri()
    ));
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Warning).await;

    // First cycle fails and requeues; second exhausts the attempts.
    engine.check_notifications().await;
    engine.check_notifications().await;

    let events = engine.delivery_events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e.outcome, DeliveryOutcome::Failed { attempt: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e.outcome, DeliveryOutcome::Dropped { attempts: 2 })));
    assert_eq!(engine.pending_count().await, 0, "dropped, not requeued");

    // Decisioning is decoupled from delivery: the failure did not roll back
    // the notified severity, so the same status stays suppressed.
    let incident = engine.incident(&key).await.unwrap();
    assert_eq!(incident.last_notified_status, Some(Status::Warning));
}

#[tokio::test]
async fn test_unacknowledged_incident_escalates_to_next_link() {
    let config = parse_config(
        r#"
        [notifications.first]
        print = true
        next = "second"
        timeout_secs = 0

        [notifications.second]
        print = true

        [alerts.a]
        crit_notification = "first"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Critical).await;
    engine.check_notifications().await;
    assert_eq!(engine.sent_count().await, 1);

    // The ack window (zero for the test) has passed; the next cycle pages
    // the second link.
    engine.check_notifications().await;
    let events = engine.delivery_events().await;
    let sent: Vec<&str> = events
        .iter()
        .filter(|e| e.outcome == DeliveryOutcome::Sent)
        .map(|e| e.notification.as_str())
        .collect();
    assert_eq!(sent, vec!["first", "second"]);
}

#[tokio::test]
async fn test_acknowledge_stops_escalation() {
    let config = parse_config(
        r#"
        [notifications.first]
        print = true
        next = "second"
        timeout_secs = 0

        [notifications.second]
        print = true

        [alerts.a]
        crit_notification = "first"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let key = AlertKey::bare("a");

    run_status(&engine, &key, Status::Critical).await;
    engine.check_notifications().await;
    assert_eq!(engine.sent_count().await, 1);

    engine
        .action("tester", "looking into it", ActionKind::Acknowledge, &key)
        .await
        .unwrap();

    engine.check_notifications().await;
    assert_eq!(engine.sent_count().await, 1, "no escalation after ack");
}

#[tokio::test]
async fn test_add_silence_validation_and_conflict() {
    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap();
    let now = Utc::now();

    let err = engine
        .add_silence(now, now - Duration::hours(1), "a", "", false, true, "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    engine
        .add_silence(now, now + Duration::hours(1), "a", "", false, true, "", "")
        .await
        .unwrap();
    let err = engine
        .add_silence(now, now + Duration::hours(2), "a", "", false, false, "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");

    let raw = format!(
        r#"
        state_file = "{}"

        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
        state_file.display()
    );

    let engine = Engine::new(parse_config(&raw)).unwrap();
    let key = AlertKey::new("a", [("host", "x")]);
    assert_eq!(step(&engine, &key, Status::Warning).await, 1);
    drop(engine);

    // A restarted engine remembers the notified incident, so the same
    // status stays flap-suppressed instead of paging again.
    let engine = Engine::new(parse_config(&raw)).unwrap();
    let incident = engine.incident(&key).await.unwrap();
    assert!(incident.open);
    assert_eq!(incident.last_notified_status, Some(Status::Warning));
    assert_eq!(step(&engine, &key, Status::Warning).await, 0);
}

#[tokio::test]
async fn test_check_runs_the_evaluator() {
    struct FixedEvaluator;

    #[async_trait::async_trait]
    impl vigil::Evaluator for FixedEvaluator {
        async fn evaluate(
            &self,
            alert: &str,
            at: chrono::DateTime<Utc>,
        ) -> Result<Vec<(AlertKey, Event)>, EngineError> {
            Ok(vec![(
                AlertKey::bare(alert),
                Event::new(Status::Warning, at),
            )])
        }
    }

    let config = parse_config(
        r#"
        [notifications.n]
        print = true

        [alerts.a]
        warn_notification = "n"
        "#,
    );
    let engine = Engine::new(config).unwrap().with_evaluator(Arc::new(FixedEvaluator));

    let run = engine.check(None, Utc::now()).await.unwrap();
    assert_eq!(run.len(), 1);
    assert_eq!(engine.pending_count().await, 1);
    assert!(engine.incident(&AlertKey::bare("a")).await.unwrap().open);
}
