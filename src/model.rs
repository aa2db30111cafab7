use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngramError;

/// Closed set of lore categories. Invalid strings are rejected at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    ArchitecturalDecision,
    PatternOutcome,
    InterfaceLesson,
    DependencyBehavior,
    TestingStrategy,
    EdgeCaseDiscovery,
    ImplementationFriction,
    PerformanceInsight,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::ArchitecturalDecision,
        Category::PatternOutcome,
        Category::InterfaceLesson,
        Category::DependencyBehavior,
        Category::TestingStrategy,
        Category::EdgeCaseDiscovery,
        Category::ImplementationFriction,
        Category::PerformanceInsight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::ArchitecturalDecision => "ARCHITECTURAL_DECISION",
            Category::PatternOutcome => "PATTERN_OUTCOME",
            Category::InterfaceLesson => "INTERFACE_LESSON",
            Category::DependencyBehavior => "DEPENDENCY_BEHAVIOR",
            Category::TestingStrategy => "TESTING_STRATEGY",
            Category::EdgeCaseDiscovery => "EDGE_CASE_DISCOVERY",
            Category::ImplementationFriction => "IMPLEMENTATION_FRICTION",
            Category::PerformanceInsight => "PERFORMANCE_INSIGHT",
        }
    }

    pub fn parse(s: &str) -> Result<Category, EngramError> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EngramError::Validation {
                field: "category".into(),
                reason: format!("unknown category '{s}'"),
            })
    }
}

/// Lifecycle of a lore's embedding, tracked separately from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Complete => "complete",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> EmbeddingStatus {
        match s {
            "complete" => EmbeddingStatus::Complete,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Pending,
        }
    }
}

pub const MAX_CONTENT_LEN: usize = 4000;
pub const MAX_CONTEXT_LEN: usize = 1000;

/// A single opinionated learning captured by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lore {
    pub id: String,
    pub content: String,
    pub context: Option<String>,
    pub category: Category,
    pub confidence: f64,
    pub embedding: Option<Vec<u8>>,
    pub embedding_status: EmbeddingStatus,
    pub source_id: String,
    pub sources: Vec<String>,
    pub validation_count: u64,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lore {
    /// Build a new lore ready for `Store::insert_lore`, applying field defaults.
    pub fn new(id: String, content: String, category: Category, source_id: String) -> Self {
        let now = Utc::now();
        Lore {
            id,
            content,
            context: None,
            category,
            confidence: 0.5,
            embedding: None,
            embedding_status: EmbeddingStatus::Pending,
            source_id: source_id.clone(),
            sources: vec![source_id],
            validation_count: 0,
            last_validated_at: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
            deleted_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngramError> {
        if self.content.is_empty() || self.content.chars().count() > MAX_CONTENT_LEN {
            return Err(EngramError::Validation {
                field: "content".into(),
                reason: format!(
                    "content must be 1..={MAX_CONTENT_LEN} characters, got {}",
                    self.content.chars().count()
                ),
            });
        }
        if let Some(ctx) = &self.context {
            if ctx.chars().count() > MAX_CONTEXT_LEN {
                return Err(EngramError::Validation {
                    field: "context".into(),
                    reason: format!("context must be at most {MAX_CONTEXT_LEN} characters"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngramError::Validation {
                field: "confidence".into(),
                reason: format!("confidence must be within [0.0, 1.0], got {}", self.confidence),
            });
        }
        Ok(())
    }
}

/// Operation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Upsert => "upsert",
            ChangeOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> ChangeOp {
        match s {
            "delete" => ChangeOp::Delete,
            _ => ChangeOp::Upsert,
        }
    }
}

/// Append-only record of a local mutation, the unit of outbound sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub operation: ChangeOp,
    pub payload: Option<serde_json::Value>,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

pub const LORE_TABLE: &str = "lore";

/// Feedback outcome as a closed sum type, never a raw string at internal boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Helpful,
    Incorrect,
    NotRelevant,
}

impl Outcome {
    pub fn delta(self) -> f64 {
        match self {
            Outcome::Helpful => 0.08,
            Outcome::Incorrect => -0.15,
            Outcome::NotRelevant => 0.0,
        }
    }

    pub fn is_helpful(self) -> bool {
        matches!(self, Outcome::Helpful)
    }
}

/// Aggregate counts returned by `Client::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_lore: i64,
    pub by_category: Vec<(String, i64)>,
    pub by_embedding_status: Vec<(String, i64)>,
    pub pending_sync: i64,
    pub last_push_seq: i64,
    pub last_pull_seq: i64,
}
