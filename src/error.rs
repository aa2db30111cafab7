use thiserror::Error;

/// The single error sum type returned across the store, sync, and façade layers.
///
/// Callers are expected to match exhaustively; every variant here is a
/// condition the spec calls out by name rather than an implementation detail.
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("not found")]
    NotFound,

    #[error("duplicate id")]
    Duplicate,

    #[error("sync requested but no remote is configured")]
    Offline,

    #[error("embedding model mismatch: local={local}, remote={remote}")]
    ModelMismatch { local: String, remote: String },

    #[error("schema mismatch: client={client_version}, server={server_version}: {detail}")]
    SchemaMismatch {
        client_version: String,
        server_version: String,
        detail: String,
    },

    #[error("remote rejected {} entries", errors.len())]
    PushValidation { errors: Vec<PushEntryError> },

    #[error("snapshot unavailable after retries")]
    SnapshotUnavailable,

    #[error("snapshot failed integrity check; store left untouched")]
    IntegrityError,

    #[error("reinitialize refused: {count} unpushed change(s) would be lost")]
    PendingSyncExists { count: i64 },

    #[error("operation on a closed store")]
    StoreClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("invalid state: {0}")]
    State(&'static str),
}

/// One rejected entry within a 422 push response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PushEntryError {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub code: String,
    pub message: String,
}

impl EngramError {
    /// Wrap an error with a short operation label, preserving the inner kind
    /// so callers can still match on it (the label lives only in the Display text).
    pub fn label(self, op: &'static str) -> LabeledError {
        LabeledError { op, inner: self }
    }
}

/// Error annotated with the façade operation that produced it.
#[derive(Error, Debug)]
#[error("{op}: {inner}")]
pub struct LabeledError {
    pub op: &'static str,
    #[source]
    pub inner: EngramError,
}

pub type Result<T> = std::result::Result<T, EngramError>;
