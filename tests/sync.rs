//! Integration tests for the Sync Engine against `MockTransport`: push
//! idempotency, bootstrap snapshot recovery (including integrity-failure
//! preservation), and delta self-echo skipping (spec §8 scenarios 5-7).

use chrono::Utc;

use engram_core::clock::MockClock;
use engram_core::config::RetryPolicy;
use engram_core::model::{Category, ChangeOp};
use engram_core::query::pack_f32;
use engram_core::store::Store;
use engram_core::sync::mock::{MockTransport, ScriptedPushResponse, SnapshotOutcomeScript};
use engram_core::sync::transport::{HealthResponse, WireChangeEntry};
use engram_core::sync::{SyncContext, SyncEngine};
use engram_core::{Lore, facade::RecordOptions, Client, ClientConfig};

fn temp_path(name: &str) -> std::path::PathBuf {
    let _ = tracing_subscriber::fmt::try_init();
    std::env::temp_dir().join(format!("engram-sync-test-{name}-{}.sqlite", uuid::Uuid::new_v4()))
}

fn cleanup(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
    let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
}

// ============================================================================
// Push idempotency (scenario 5)
// ============================================================================

#[test]
fn push_retries_transient_failure_with_same_push_id_and_advances_cursor_once() {
    let path = temp_path("push");
    let store = Store::open(&path).unwrap();
    let source_id = store.source_id().unwrap();

    let lore_a = Lore::new("first-lore-id-000000000000".into(), "one".into(), Category::PatternOutcome, source_id.clone());
    let lore_b = Lore::new("second-lore-id-00000000000".into(), "two".into(), Category::PatternOutcome, source_id.clone());
    store.insert_lore(&lore_a).unwrap();
    store.insert_lore(&lore_b).unwrap();

    let transport = MockTransport::new();
    transport.queue_push_responses(vec![ScriptedPushResponse::Transient, ScriptedPushResponse::Accept]);

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let report = engine.push(&ctx).unwrap();

    assert_eq!(report.entries_pushed, 2);
    assert_eq!(transport.remote_log().len(), 2);
    assert_eq!(store.last_push_seq().unwrap(), report.last_push_seq);

    // Both attempts (the 502 and the eventual 200) carried the same push_id.
    let seen = transport.seen_push_ids();
    assert_eq!(seen.len(), 1, "exactly one push_id should have been recorded as accepted");

    // A retried push of the identical batch is recognized as a replay and
    // must not duplicate entries or move the cursor further.
    let second = engine.push(&ctx).unwrap();
    assert_eq!(second.entries_pushed, 0);
    assert_eq!(transport.remote_log().len(), 2);

    store.close().unwrap();
    cleanup(&path);
}

#[test]
fn push_retries_transport_level_connection_failure_not_just_http_5xx() {
    let path = temp_path("push-transport-err");
    let store = Store::open(&path).unwrap();
    let source_id = store.source_id().unwrap();
    let lore = Lore::new("third-lore-id-0000000000000".into(), "three".into(), Category::PatternOutcome, source_id);
    store.insert_lore(&lore).unwrap();

    let transport = MockTransport::new();
    // A connection-level failure (timeout, refused, DNS) never reaches an
    // HTTP response and so never produces a `PushOutcome` at all; the
    // transport itself returns `Err`. This must be retried exactly like a
    // scripted `Transient` response, not propagated as a hard failure.
    transport.queue_push_responses(vec![ScriptedPushResponse::TransportErr, ScriptedPushResponse::Accept]);

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let report = engine.push(&ctx).unwrap();
    assert_eq!(report.entries_pushed, 1);
    assert_eq!(transport.remote_log().len(), 1);
    assert_eq!(store.last_push_seq().unwrap(), report.last_push_seq);

    store.close().unwrap();
    cleanup(&path);
}

#[test]
fn push_exhausts_retries_on_persistent_transport_failure() {
    let path = temp_path("push-transport-err-exhausted");
    let store = Store::open(&path).unwrap();
    let source_id = store.source_id().unwrap();
    let lore = Lore::new("fourth-lore-id-000000000000".into(), "four".into(), Category::PatternOutcome, source_id);
    store.insert_lore(&lore).unwrap();

    let transport = MockTransport::new();
    transport.queue_push_responses(vec![
        ScriptedPushResponse::TransportErr,
        ScriptedPushResponse::TransportErr,
        ScriptedPushResponse::TransportErr,
        ScriptedPushResponse::TransportErr,
        ScriptedPushResponse::TransportErr,
    ]);

    // max_attempts=5 with zero delay so the test doesn't actually sleep.
    let retry = RetryPolicy { max_attempts: 5, base_delay: std::time::Duration::ZERO, max_delay: std::time::Duration::ZERO };
    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, retry, "default").unwrap();
    let ctx = SyncContext::default();

    let err = engine.push(&ctx).unwrap_err();
    assert!(matches!(err, engram_core::EngramError::Transport(_)));
    assert_eq!(store.last_push_seq().unwrap(), 0, "cursor must not advance on exhausted retries");

    store.close().unwrap();
    cleanup(&path);
}

// ============================================================================
// Bootstrap (scenario 6: integrity failure preserves existing store)
// ============================================================================

#[test]
fn bootstrap_integrity_failure_leaves_existing_store_untouched() {
    let path = temp_path("bootstrap-garbage");
    let store = Store::open(&path).unwrap();
    let source_id = store.source_id().unwrap();
    let existing = Lore::new("EXISTING_001".into(), "pre-bootstrap content".into(), Category::PatternOutcome, source_id);
    store.insert_lore(&existing).unwrap();

    let transport = MockTransport::new();
    transport.set_health(HealthResponse {
        status: "ok".into(),
        version: "1".into(),
        embedding_model: "text-embed-v1".into(),
        lore_count: 0,
        last_snapshot: None,
    });
    // No local embedding_model recorded yet, so model-mismatch gating does
    // not fire; the garbage snapshot body fails `PRAGMA integrity_check`.
    transport.queue_snapshot_responses(vec![SnapshotOutcomeScript::Garbage]);

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let err = engine.bootstrap(&ctx).unwrap_err();
    assert!(matches!(err, engram_core::EngramError::IntegrityError));

    let still_there = store.get("EXISTING_001").unwrap();
    assert_eq!(still_there.content, "pre-bootstrap content");

    store.close().unwrap();
    cleanup(&path);
}

#[test]
fn bootstrap_success_replaces_store_and_resets_cursors() {
    // Build a fresh snapshot file with one lore row and one change-log entry,
    // then feed its raw bytes to a second store's bootstrap.
    let snapshot_path = temp_path("bootstrap-snapshot-source");
    {
        let source_store = Store::open(&snapshot_path).unwrap();
        let source_id = source_store.source_id().unwrap();
        let lore = Lore::new("SNAPSHOT_LORE_0000000000".into(), "from remote".into(), Category::PatternOutcome, source_id);
        source_store.insert_lore(&lore).unwrap();
        source_store.close().unwrap();
    }
    let snapshot_bytes = std::fs::read(&snapshot_path).unwrap();

    let path = temp_path("bootstrap-dest");
    let store = Store::open(&path).unwrap();

    let transport = MockTransport::new();
    transport.set_health(HealthResponse {
        status: "ok".into(),
        version: "1".into(),
        embedding_model: "text-embed-v1".into(),
        lore_count: 1,
        last_snapshot: None,
    });
    transport.set_snapshot_bytes(snapshot_bytes);

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let outcome = engine.bootstrap(&ctx).unwrap();
    assert_eq!(outcome.embedding_model, "text-embed-v1");
    assert_eq!(outcome.last_pull_seq, 1);

    let replicated = store.get("SNAPSHOT_LORE_0000000000").unwrap();
    assert_eq!(replicated.content, "from remote");
    assert_eq!(store.last_push_seq().unwrap(), 0);
    assert_eq!(store.last_pull_seq().unwrap(), 1);
    assert_eq!(store.source_id().unwrap(), outcome.source_id);

    store.close().unwrap();
    cleanup(&path);
    cleanup(&snapshot_path);
}

// ============================================================================
// Delta self-echo skip (scenario 7)
// ============================================================================

#[test]
fn delta_skips_self_echo_but_advances_cursor() {
    let path = temp_path("delta-echo");
    let store = Store::open(&path).unwrap();
    let own_source_id = store.source_id().unwrap();

    let existing = Lore::new("PRE_EXISTING_0000000000".into(), "untouched".into(), Category::PatternOutcome, own_source_id.clone());
    store.insert_lore(&existing).unwrap();
    let change_log_rows_before = store.unpushed_changes(&own_source_id, 0, 1000).unwrap().len();

    let transport = MockTransport::new();
    let echoed_payload = serde_json::to_value(&existing).unwrap();
    transport.inject_remote_entry(WireChangeEntry {
        sequence: 0, // overwritten by inject_remote_entry
        table_name: "lore".into(),
        entity_id: existing.id.clone(),
        operation: ChangeOp::Upsert,
        payload: Some(echoed_payload),
        source_id: own_source_id.clone(),
        created_at: Utc::now(),
        received_at: Utc::now(),
    });

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let report = engine.delta(&ctx).unwrap();
    assert_eq!(report.entries_applied, 0);
    assert_eq!(report.entries_skipped_self_echo, 1);
    assert_eq!(report.last_pull_seq, 1);
    assert_eq!(store.last_pull_seq().unwrap(), 1);

    // The self-echo must not have produced a new change-log entry.
    let change_log_rows_after = store.unpushed_changes(&own_source_id, 0, 1000).unwrap().len();
    assert_eq!(change_log_rows_before, change_log_rows_after);

    store.close().unwrap();
    cleanup(&path);
}

#[test]
fn delta_applies_remote_upsert_from_another_source_and_sets_embedding_pending() {
    let path = temp_path("delta-apply");
    let store = Store::open(&path).unwrap();

    let transport = MockTransport::new();
    let other_source_id = uuid::Uuid::new_v4().to_string();
    let mut remote_lore = Lore::new(
        "REMOTE_LORE_00000000000".into(),
        "authored elsewhere".into(),
        Category::DependencyBehavior,
        other_source_id.clone(),
    );
    remote_lore.embedding = Some(pack_f32(&[0.1, 0.2]));
    remote_lore.embedding_status = engram_core::model::EmbeddingStatus::Complete;
    let payload = serde_json::to_value(&remote_lore).unwrap();

    transport.inject_remote_entry(WireChangeEntry {
        sequence: 0,
        table_name: "lore".into(),
        entity_id: remote_lore.id.clone(),
        operation: ChangeOp::Upsert,
        payload: Some(payload),
        source_id: other_source_id,
        created_at: Utc::now(),
        received_at: Utc::now(),
    });

    let clock = MockClock::new(Utc::now());
    let engine = SyncEngine::new(&store, &transport, &clock, RetryPolicy::default(), "default").unwrap();
    let ctx = SyncContext::default();

    let report = engine.delta(&ctx).unwrap();
    assert_eq!(report.entries_applied, 1);
    assert_eq!(report.entries_skipped_self_echo, 0);

    let applied = store.get("REMOTE_LORE_00000000000").unwrap();
    assert_eq!(applied.content, "authored elsewhere");
    // Embedding must be regenerated locally: applied via delta always lands pending.
    assert_eq!(applied.embedding_status, engram_core::model::EmbeddingStatus::Pending);
    let change_log_rows_after_first = store.max_change_log_sequence().unwrap();
    assert_eq!(change_log_rows_after_first, 0, "applying an inbound delta must never write a change-log row (I7)");

    // Simulate a replay of the same entry (e.g. the remote redelivering a
    // page after this client's cursor was lost) by rewinding `last_pull_seq`
    // and calling `delta()` a second time: the same entry is fetched and
    // applied again. Final state must be identical to applying it once.
    store.set_sync_meta("last_pull_seq", "0").unwrap();
    let replay_report = engine.delta(&ctx).unwrap();
    assert_eq!(replay_report.entries_applied, 1);

    let reapplied = store.get("REMOTE_LORE_00000000000").unwrap();
    assert_eq!(reapplied.content, applied.content);
    assert_eq!(reapplied.confidence, applied.confidence);
    assert_eq!(reapplied.embedding, applied.embedding);
    assert_eq!(reapplied.embedding_status, applied.embedding_status);
    assert_eq!(reapplied.updated_at, applied.updated_at);
    let change_log_rows_after_replay = store.max_change_log_sequence().unwrap();
    assert_eq!(change_log_rows_after_replay, 0, "replaying the entry must still not write a change-log row");

    store.close().unwrap();
    cleanup(&path);
}

// ============================================================================
// Client façade wiring: Offline when no remote is configured.
// ============================================================================

#[test]
fn facade_sync_push_without_remote_returns_offline() {
    let path = temp_path("facade-offline");
    let config = ClientConfig::new(path.clone(), "default");
    let client = Client::new(config).unwrap();
    client.record("needs a remote", Category::PatternOutcome, RecordOptions::default()).unwrap();

    let err = client.sync_push(&SyncContext::default()).unwrap_err();
    assert!(matches!(err.inner, engram_core::EngramError::Offline));

    client.close().unwrap();
    cleanup(&path);
}
