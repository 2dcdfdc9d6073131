//! Integration tests for payload redaction, end to end through the guard.

use donation_guard::domain::redaction::{CIRCULAR, REDACTED};
use donation_guard::infrastructure::mocks::{FaultyStore, MockClock};
use donation_guard::{Guard, KeyPolicy, LogEvent, PayloadValue, RedactionLimits, Redactor, SharedValue};
use serde_json::json;
use std::sync::Arc;

fn guard(store: &FaultyStore) -> Guard<FaultyStore> {
    Guard::builder(store.clone())
        .with_clock(Arc::new(MockClock::at_millis(1_700_000_000_000)))
        .build()
        .unwrap()
}

async fn persisted_metadata(store: &FaultyStore, guard: &Guard<FaultyStore>, event: LogEvent) -> serde_json::Value {
    assert!(guard.submit_client_error(event).await.is_persisted());
    let docs = store.inner().documents_in("error_logs");
    docs.last().unwrap()["metadata"].clone()
}

#[tokio::test]
async fn test_authorization_header_is_redacted_and_note_kept() {
    let store = FaultyStore::new();
    let guard = guard(&store);

    let metadata = persisted_metadata(
        &store,
        &guard,
        LogEvent::error("Request rejected")
            .with_route("/api/requests")
            .with_metadata("authorization", "Bearer abc.def.ghi")
            .with_metadata("note", "ok"),
    )
    .await;

    assert_eq!(metadata["authorization"], REDACTED);
    assert_eq!(metadata["note"], "ok");
}

#[tokio::test]
async fn test_secrets_in_free_text_are_scrubbed() {
    let store = FaultyStore::new();
    let guard = guard(&store);

    let event = LogEvent::error("Login failed for donor@example.org")
        .with_route("/api/auth/login")
        .with_stack("Error: token=sk_live_123 rejected\n    at login (auth.js:10)")
        .with_metadata("context", "called +91 98765-43210 with Bearer eyJhbGciOi.eyJzdWIi.c2ln");
    let metadata = persisted_metadata(&store, &guard, event).await;

    let record = store.inner().documents_in("error_logs").pop().unwrap();
    let message = record["message"].as_str().unwrap();
    assert!(!message.contains("donor@example.org"));
    assert!(message.starts_with("Login failed for "));

    let stack = record["stack"].as_str().unwrap();
    assert!(!stack.contains("sk_live_123"));

    let context = metadata["context"].as_str().unwrap();
    assert!(!context.contains("98765"));
    assert!(!context.contains("eyJhbGciOi"));
    assert!(context.starts_with("called "));
}

#[tokio::test]
async fn test_cyclic_request_context_is_persisted() {
    let store = FaultyStore::new();
    let guard = guard(&store);

    let request = SharedValue::new(PayloadValue::object());
    request.insert("path", PayloadValue::from("/api/donors"));
    request.insert("self", PayloadValue::Shared(request.clone()));

    let metadata = persisted_metadata(
        &store,
        &guard,
        LogEvent::error("Handler crashed")
            .with_route("/api/donors")
            .with_metadata("request", PayloadValue::Shared(request.clone())),
    )
    .await;

    assert_eq!(metadata["request"]["path"], "/api/donors");
    assert_eq!(metadata["request"]["self"], CIRCULAR);
}

#[tokio::test]
async fn test_oversized_payloads_are_bounded() {
    let store = FaultyStore::new();
    let guard = guard(&store);

    let items: Vec<PayloadValue> = (0..100_u64).map(PayloadValue::from).collect();
    let metadata = persisted_metadata(
        &store,
        &guard,
        LogEvent::error("Bulk import failed")
            .with_route("/api/ngos/import")
            .with_metadata("rows", PayloadValue::from(items))
            .with_metadata("blob", "x".repeat(5_000)),
    )
    .await;

    let rows = metadata["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 51);
    assert_eq!(rows[50], "[+50 more items]");
    assert!(metadata["blob"].as_str().unwrap().ends_with("…[truncated 3000 chars]"));
}

#[tokio::test]
async fn test_custom_client_redactor() {
    let store = FaultyStore::new();
    let guard = Guard::builder(store.clone())
        .with_clock(Arc::new(MockClock::at_millis(1_700_000_000_000)))
        .with_client_redactor(
            Redactor::new(RedactionLimits::default())
                .with_key_policy(KeyPolicy::default().allow("session_id")),
        )
        .build()
        .unwrap();

    let metadata = persisted_metadata(
        &store,
        &guard,
        LogEvent::error("Checkout failed")
            .with_route("/api/campaigns/12/donate")
            .with_metadata("session_id", "s-1")
            .with_metadata("password", "hunter2"),
    )
    .await;

    assert_eq!(metadata, json!({"session_id": "s-1", "password": REDACTED}));
}
