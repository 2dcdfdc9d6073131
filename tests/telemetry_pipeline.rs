//! Integration tests for the error telemetry pipeline.

use donation_guard::application::dedup_cache::DedupKey;
use donation_guard::infrastructure::mocks::{FaultyStore, MockCaptureLayer, MockClock};
use donation_guard::{Fingerprint, Guard, LogEvent, LogOutcome, Scope, SuppressReason};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;

const START_MS: u64 = 1_700_000_000_000;
const ROUTE: &str = "/api/donors/profile";

fn guard_with(store: &FaultyStore, clock: &MockClock) -> Guard<FaultyStore> {
    Guard::builder(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn profile_error(message: &str) -> LogEvent {
    LogEvent::error(message)
        .with_route(ROUTE)
        .with_method("POST")
        .with_code("permission-denied")
        .with_stack("FirebaseError: Missing or insufficient permissions.\n    at save (profile.js:42)")
}

fn error_logs(store: &FaultyStore) -> Vec<serde_json::Value> {
    store.inner().documents_in("error_logs")
}

#[tokio::test]
async fn test_messages_differing_in_uuid_are_deduplicated() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let first = guard
        .submit_client_error(profile_error(
            "Failed to save donor 3f2b9c1e-8d4a-4e7b-9c2d-1a2b3c4d5e6f",
        ))
        .await;
    clock.advance(Duration::from_secs(1));
    let second = guard
        .submit_client_error(profile_error(
            "Failed to save donor 9a8b7c6d-5e4f-4a3b-8c2d-0e1f2a3b4c5d",
        ))
        .await;

    assert!(first.is_persisted());
    assert_eq!(second, LogOutcome::Suppressed(SuppressReason::Duplicate));
    assert_eq!(error_logs(&store).len(), 1);
    assert_eq!(guard.metrics().suppressed_locally(), 1);
}

#[tokio::test]
async fn test_repeat_outside_dedupe_window_is_admitted() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let first = guard.submit_client_error(profile_error("Failed to save")).await;
    clock.advance(Duration::from_secs(45));
    let second = guard.submit_client_error(profile_error("Failed to save")).await;

    let LogOutcome::Persisted(fingerprint) = first else {
        panic!("first event should be persisted, got {:?}", first);
    };
    assert!(second.is_persisted());
    assert_eq!(error_logs(&store).len(), 2);

    let entry = guard
        .client_pipeline()
        .deduplicator()
        .cache()
        .entry(&DedupKey::new(Some(ROUTE), fingerprint))
        .unwrap();
    assert_eq!(entry.count, 2);
}

#[tokio::test]
async fn test_burst_of_identical_events_persists_once() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    for _ in 0..50 {
        guard.log_error(profile_error("Failed to save")).await;
    }

    assert_eq!(error_logs(&store).len(), 1);
    let snapshot = guard.metrics().snapshot();
    assert_eq!(snapshot.records_persisted, 1);
    assert_eq!(snapshot.suppressed_locally, 49);
}

#[tokio::test]
async fn test_throttle_cap_limits_spaced_repeats() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = Guard::builder(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_dedupe_window(Duration::from_secs(1))
        .with_throttle_window(Duration::from_secs(60))
        .with_throttle_limit(3)
        .build()
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(guard.submit_client_error(profile_error("Failed to save")).await);
        clock.advance(Duration::from_secs(2));
    }

    assert!(outcomes[..3].iter().all(LogOutcome::is_persisted));
    assert_eq!(
        outcomes[3],
        LogOutcome::Suppressed(SuppressReason::ThrottleCapReached)
    );
    assert_eq!(
        outcomes[4],
        LogOutcome::Suppressed(SuppressReason::ThrottleCapReached)
    );

    // A fresh throttle window admits again.
    clock.advance(Duration::from_secs(60));
    assert!(guard
        .submit_client_error(profile_error("Failed to save"))
        .await
        .is_persisted());
}

#[tokio::test]
async fn test_backstop_catches_events_seen_by_another_instance() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let first_instance = guard_with(&store, &clock);
    let second_instance = guard_with(&store, &clock);

    assert!(first_instance
        .submit_client_error(profile_error("Failed to save"))
        .await
        .is_persisted());

    clock.advance(Duration::from_secs(5));
    let outcome = second_instance
        .submit_client_error(profile_error("Failed to save"))
        .await;

    assert_eq!(outcome, LogOutcome::Suppressed(SuppressReason::SeenByPeer));
    assert_eq!(error_logs(&store).len(), 1);
    assert_eq!(second_instance.metrics().suppressed_by_backstop(), 1);

    // Once the record ages out of the dedupe window the peer admits it.
    clock.advance(Duration::from_secs(70));
    assert!(second_instance
        .submit_client_error(profile_error("Failed to save"))
        .await
        .is_persisted());
}

#[tokio::test]
async fn test_backstop_falls_back_to_unordered_query() {
    let store = FaultyStore::new();
    store.fail_ordered_queries(true);
    let clock = MockClock::at_millis(START_MS);
    let first_instance = guard_with(&store, &clock);
    let second_instance = guard_with(&store, &clock);

    first_instance.log_error(profile_error("Failed to save")).await;
    clock.advance(Duration::from_secs(5));
    let outcome = second_instance
        .submit_client_error(profile_error("Failed to save"))
        .await;

    assert_eq!(outcome, LogOutcome::Suppressed(SuppressReason::SeenByPeer));
    assert_eq!(store.ordered_query_calls(), 2);
    assert_eq!(store.unordered_query_calls(), 2);
    assert_eq!(second_instance.metrics().backstop_failures(), 0);
}

#[tokio::test]
async fn test_backstop_failure_admits_event() {
    let store = FaultyStore::new();
    store.fail_ordered_queries(true);
    store.fail_unordered_queries(true);
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let outcome = guard.submit_client_error(profile_error("Failed to save")).await;

    assert!(outcome.is_persisted());
    assert_eq!(guard.metrics().backstop_failures(), 1);
    assert_eq!(error_logs(&store).len(), 1);
}

#[tokio::test]
async fn test_persist_failure_is_swallowed_and_logged() {
    let capture = MockCaptureLayer::new();
    let _default = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let store = FaultyStore::new();
    store.fail_appends(true);
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let outcome = guard.submit_client_error(profile_error("Failed to save")).await;

    assert_eq!(outcome, LogOutcome::PersistFailed);
    assert_eq!(guard.metrics().persist_failures(), 1);
    let warnings = capture.at_level(tracing::Level::WARN);
    assert!(warnings
        .iter()
        .any(|event| event.message == "failed to persist error record"
            && event.fields.contains_key("error")));
}

#[tokio::test]
async fn test_adapter_panic_never_reaches_caller() {
    let store = FaultyStore::new();
    store.panic_on_append(true);
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let outcome = guard.submit_client_error(profile_error("Failed to save")).await;
    assert_eq!(outcome, LogOutcome::InternalFailure);
    assert_eq!(guard.metrics().internal_failures(), 1);

    store.panic_on_append(false);
    clock.advance(Duration::from_secs(1));
    assert!(guard
        .submit_client_error(profile_error("Failed to load campaigns").with_route("/api/campaigns"))
        .await
        .is_persisted());
}

#[tokio::test]
async fn test_stalled_store_is_bounded_by_timeout() {
    let store = FaultyStore::new();
    store.stall(true);
    let clock = MockClock::at_millis(START_MS);
    let guard = Guard::builder(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_store_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let started = Instant::now();
    let outcome = guard.submit_client_error(profile_error("Failed to save")).await;

    assert_eq!(outcome, LogOutcome::PersistFailed);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(guard.metrics().backstop_failures(), 1);
}

#[tokio::test]
async fn test_dedupe_cache_stays_bounded() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = Guard::builder(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_max_cache_entries(10)
        .build()
        .unwrap();

    for i in 0..25 {
        guard
            .log_error(LogEvent::error(format!("failure {}", i)).with_route(ROUTE))
            .await;
    }

    let cache = guard.client_pipeline().deduplicator().cache();
    assert!(cache.len() <= 10);
    assert!(guard.metrics().cache_evictions() >= 15);
    assert_eq!(error_logs(&store).len(), 25);
}

#[tokio::test]
async fn test_records_carry_scope_source_and_redacted_fields() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    guard
        .log_error(
            profile_error("Failed to save")
                .with_actor("uid-7", "donor")
                .with_metadata("email", "donor@example.org")
                .with_metadata("attempt", 2_u64),
        )
        .await;
    guard
        .log_server_error(
            LogEvent::error("Firestore write failed")
                .with_route("/api/stock")
                .with_scope(Scope::Bloodbank),
        )
        .await;

    let docs = error_logs(&store);
    assert_eq!(docs.len(), 2);
    let client = docs.iter().find(|d| d["source"] == "client").unwrap();
    let server = docs.iter().find(|d| d["source"] == "server").unwrap();

    assert_eq!(client["scope"], "donor");
    assert_eq!(client["method"], "POST");
    assert_eq!(client["actorId"], "uid-7");
    assert_eq!(client["createdAt"], START_MS);
    assert_eq!(client["metadata"]["email"], "[REDACTED]");
    assert_eq!(client["metadata"]["attempt"], 2);
    assert_eq!(
        client["fingerprint"].as_str().map(str::len),
        Some(64),
        "fingerprint is a sha-256 hex digest"
    );

    assert_eq!(server["scope"], "bloodbank");
}

#[tokio::test]
async fn test_client_and_server_pipelines_dedupe_independently() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    guard.log_error(profile_error("Failed to save")).await;
    clock.advance(Duration::from_secs(2));
    let server = guard.submit_server_error(profile_error("Failed to save")).await;

    assert!(server.is_persisted(), "client record must not suppress server event: {:?}", server);
    assert_eq!(guard.metrics().suppressed_by_backstop(), 0);
    assert_eq!(guard.server_pipeline().deduplicator().cache().len(), 1);
    assert_eq!(
        guard.client_pipeline().deduplicator().cache().len(),
        1,
        "pipelines own separate caches"
    );
    let fingerprints: Vec<_> = error_logs(&store)
        .iter()
        .map(|d| Fingerprint::from_hex(d["fingerprint"].as_str().unwrap()))
        .collect();
    assert_eq!(fingerprints[0], fingerprints[1]);
}

#[tokio::test]
async fn test_server_record_does_not_suppress_client_event() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let server_instance = guard_with(&store, &clock);
    let client_instance = guard_with(&store, &clock);

    assert!(server_instance
        .submit_server_error(profile_error("Failed to save"))
        .await
        .is_persisted());
    clock.advance(Duration::from_secs(2));

    // A peer instance sees the server record in the store but reports for the client.
    assert!(client_instance
        .submit_client_error(profile_error("Failed to save"))
        .await
        .is_persisted());
    assert_eq!(error_logs(&store).len(), 2);
}

#[tokio::test]
async fn test_messages_differing_only_in_redacted_email_are_deduplicated() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);

    let first = guard
        .submit_client_error(profile_error("login failed for alice@example.com"))
        .await;
    clock.advance(Duration::from_secs(1));
    let second = guard
        .submit_client_error(profile_error("login failed for bob@example.org"))
        .await;

    assert!(first.is_persisted());
    assert_eq!(second, LogOutcome::Suppressed(SuppressReason::Duplicate));
    let docs = error_logs(&store);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["message"], "login failed for [REDACTED_EMAIL]");
}

#[tokio::test]
async fn test_routes_differing_only_in_token_are_deduplicated() {
    let store = FaultyStore::new();
    let clock = MockClock::at_millis(START_MS);
    let guard = guard_with(&store, &clock);
    let callback_error = |route: &str| LogEvent::error("OAuth callback failed").with_route(route);

    let first = guard
        .submit_client_error(callback_error("/api/auth/cb?access_token=AAA111"))
        .await;
    clock.advance(Duration::from_secs(1));
    let second = guard
        .submit_client_error(callback_error("/api/auth/cb?access_token=BBB222"))
        .await;

    let fingerprint = match first {
        LogOutcome::Persisted(fingerprint) => fingerprint,
        other => panic!("expected a persisted record, got {:?}", other),
    };
    assert_eq!(second, LogOutcome::Suppressed(SuppressReason::Duplicate));

    // The cache is keyed by the redacted route; raw tokens never become keys.
    let cache = guard.client_pipeline().deduplicator().cache();
    assert_eq!(cache.len(), 1);
    assert!(cache
        .entry(&DedupKey::new(Some("/api/auth/cb?access_token=[REDACTED]"), fingerprint))
        .is_some());
    assert_eq!(error_logs(&store)[0]["route"], "/api/auth/cb?access_token=[REDACTED]");
}
