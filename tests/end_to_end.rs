//! Integration tests for the client façade: record, query, and feedback
//! against a real (temp-file) SQLite store.

use engram_core::facade::RecordOptions;
use engram_core::query::{pack_f32, QueryParams};
use engram_core::{Category, ClientConfig, Client, Outcome};

/// Helper: open a fresh store at a unique temp-file path.
fn open_client() -> (Client, std::path::PathBuf) {
    let _ = tracing_subscriber::fmt::try_init();
    let path = std::env::temp_dir().join(format!("engram-test-{}.sqlite", uuid::Uuid::new_v4()));
    let config = ClientConfig::new(path.clone(), "default");
    let client = Client::new(config).unwrap();
    (client, path)
}

fn cleanup(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
    let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
}

fn record_with_embedding(
    client: &Client,
    content: &str,
    embedding: Vec<f32>,
    confidence: f64,
) -> engram_core::Lore {
    client
        .record(
            content,
            Category::PatternOutcome,
            RecordOptions {
                context: None,
                confidence: Some(confidence),
                embedding: Some(pack_f32(&embedding)),
            },
        )
        .unwrap()
}

// ============================================================================
// Basic record & query
// ============================================================================

#[test]
fn basic_record_and_query_orders_by_similarity() {
    let (client, path) = open_client();

    record_with_embedding(&client, "high similarity", vec![0.9, 0.1, 0.0], 0.8);
    record_with_embedding(&client, "medium similarity", vec![0.5, 0.5, 0.0], 0.8);
    record_with_embedding(&client, "low similarity", vec![0.0, 1.0, 0.0], 0.8);

    let result = client
        .query(&QueryParams {
            query_text: String::new(),
            query_embedding: Some(vec![1.0, 0.0, 0.0]),
            k: Some(10),
            min_confidence: None,
            categories: None,
        })
        .unwrap();

    assert_eq!(result.lore.len(), 3);
    assert_eq!(result.lore[0].content, "high similarity");
    assert_eq!(result.lore[1].content, "medium similarity");
    assert_eq!(result.lore[2].content, "low similarity");
    assert_eq!(result.session_refs.len(), 3);

    cleanup(&path);
}

#[test]
fn query_without_embedding_returns_empty() {
    let (client, path) = open_client();
    record_with_embedding(&client, "has embedding", vec![1.0, 0.0], 0.8);

    let result = client
        .query(&QueryParams {
            query_text: "anything".into(),
            query_embedding: None,
            k: None,
            min_confidence: None,
            categories: None,
        })
        .unwrap();

    assert!(result.lore.is_empty());
    cleanup(&path);
}

// ============================================================================
// Top-k truncation
// ============================================================================

#[test]
fn top_k_truncates_to_requested_count() {
    let (client, path) = open_client();
    for i in 0..5 {
        record_with_embedding(&client, &format!("entry {i}"), vec![i as f32, 1.0], 0.8);
    }

    let result = client
        .query(&QueryParams {
            query_text: String::new(),
            query_embedding: Some(vec![1.0, 1.0]),
            k: Some(3),
            min_confidence: None,
            categories: None,
        })
        .unwrap();

    assert_eq!(result.lore.len(), 3);
    cleanup(&path);
}

// ============================================================================
// Filter AND semantics
// ============================================================================

#[test]
fn category_and_confidence_filters_combine_with_and() {
    let (client, path) = open_client();

    client
        .record(
            "pattern high",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.8), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();
    client
        .record(
            "pattern higher",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.9), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();
    client
        .record(
            "other category",
            Category::InterfaceLesson,
            RecordOptions { confidence: Some(0.8), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();
    client
        .record(
            "pattern low",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.5), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();

    let result = client
        .query(&QueryParams {
            query_text: String::new(),
            query_embedding: Some(vec![1.0, 0.0]),
            k: Some(10),
            min_confidence: Some(0.7),
            categories: Some(vec![Category::PatternOutcome]),
        })
        .unwrap();

    assert_eq!(result.lore.len(), 2);
    assert!(result.lore.iter().all(|l| l.category == Category::PatternOutcome));
    assert!(result.lore.iter().all(|l| l.confidence >= 0.7));

    cleanup(&path);
}

#[test]
fn min_confidence_explicit_zero_differs_from_unset() {
    let (client, path) = open_client();
    client
        .record(
            "low conf",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.1), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();
    client
        .record(
            "mid conf",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.2), embedding: Some(pack_f32(&[1.0, 0.0])), ..Default::default() },
        )
        .unwrap();

    let explicit_zero = client
        .query(&QueryParams {
            query_text: String::new(),
            query_embedding: Some(vec![1.0, 0.0]),
            k: Some(10),
            min_confidence: Some(0.0),
            categories: None,
        })
        .unwrap();
    assert_eq!(explicit_zero.lore.len(), 2);

    let unset = client
        .query(&QueryParams {
            query_text: String::new(),
            query_embedding: Some(vec![1.0, 0.0]),
            k: Some(10),
            min_confidence: None,
            categories: None,
        })
        .unwrap();
    assert!(unset.lore.is_empty(), "default floor of 0.5 should exclude both entries");

    cleanup(&path);
}

// ============================================================================
// Feedback clamping and counters
// ============================================================================

#[test]
fn feedback_clamps_confidence_and_advances_counter_only_on_helpful() {
    let (client, path) = open_client();
    let lore = client.record("a lesson", Category::PatternOutcome, RecordOptions::default()).unwrap();
    assert_eq!(lore.confidence, 0.5);
    assert_eq!(lore.validation_count, 0);

    let after_helpful = client.feedback(&lore.id, Outcome::Helpful).unwrap();
    assert!((after_helpful.confidence - 0.58).abs() < 1e-9);
    assert_eq!(after_helpful.validation_count, 1);
    assert!(after_helpful.last_validated_at.is_some());

    let after_incorrect = client.feedback(&lore.id, Outcome::Incorrect).unwrap();
    assert!((after_incorrect.confidence - 0.43).abs() < 1e-9);
    assert_eq!(after_incorrect.validation_count, 1);

    let after_not_relevant = client.feedback(&lore.id, Outcome::NotRelevant).unwrap();
    assert!((after_not_relevant.confidence - 0.43).abs() < 1e-9);
    assert_eq!(after_not_relevant.validation_count, 1);

    cleanup(&path);
}

#[test]
fn feedback_confidence_clamps_at_boundaries() {
    let (client, path) = open_client();
    let high = client
        .record(
            "near top",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.95), ..Default::default() },
        )
        .unwrap();
    let clamped_high = client.feedback(&high.id, Outcome::Helpful).unwrap();
    assert_eq!(clamped_high.confidence, 1.0);

    let low = client
        .record(
            "near bottom",
            Category::PatternOutcome,
            RecordOptions { confidence: Some(0.05), ..Default::default() },
        )
        .unwrap();
    let clamped_low = client.feedback(&low.id, Outcome::Incorrect).unwrap();
    assert_eq!(clamped_low.confidence, 0.0);

    cleanup(&path);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn content_length_boundary() {
    let (client, path) = open_client();
    let max_ok = "a".repeat(4000);
    assert!(client.record(max_ok, Category::PatternOutcome, RecordOptions::default()).is_ok());

    let too_long = "a".repeat(4001);
    assert!(client.record(too_long, Category::PatternOutcome, RecordOptions::default()).is_err());

    cleanup(&path);
}

#[test]
fn context_length_boundary() {
    let (client, path) = open_client();
    let max_ok = "c".repeat(1000);
    let ok = client.record(
        "content",
        Category::PatternOutcome,
        RecordOptions { context: Some(max_ok), ..Default::default() },
    );
    assert!(ok.is_ok());

    let too_long = "c".repeat(1001);
    let err = client.record(
        "content",
        Category::PatternOutcome,
        RecordOptions { context: Some(too_long), ..Default::default() },
    );
    assert!(err.is_err());

    cleanup(&path);
}

#[test]
fn confidence_range_boundary() {
    let (client, path) = open_client();
    assert!(client
        .record("ok1", Category::PatternOutcome, RecordOptions { confidence: Some(0.0), ..Default::default() })
        .is_ok());
    assert!(client
        .record("ok2", Category::PatternOutcome, RecordOptions { confidence: Some(1.0), ..Default::default() })
        .is_ok());
    assert!(client
        .record("bad1", Category::PatternOutcome, RecordOptions { confidence: Some(-0.001), ..Default::default() })
        .is_err());
    assert!(client
        .record("bad2", Category::PatternOutcome, RecordOptions { confidence: Some(1.001), ..Default::default() })
        .is_err());

    cleanup(&path);
}

#[test]
fn feedback_batch_separates_updates_from_errors() {
    let (client, path) = open_client();
    let a = client.record("a", Category::PatternOutcome, RecordOptions::default()).unwrap();
    let b = client.record("b", Category::PatternOutcome, RecordOptions::default()).unwrap();

    let result = client.feedback_batch(&engram_core::feedback::FeedbackBatchParams {
        helpful: vec![a.id.clone()],
        not_relevant: vec![b.id.clone()],
        incorrect: vec!["does-not-exist".to_string()],
    });

    assert_eq!(result.updated.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].0, "does-not-exist");

    cleanup(&path);
}
