//! Bidirectional change-log-based replication against a remote service:
//! Bootstrap (snapshot recovery), Push (drain local change log), Delta
//! (apply remote change log), plus a small store-catalog read path.

mod bootstrap;
mod catalog;
mod delta;
mod push;
pub mod mock;
pub mod transport;

pub use bootstrap::BootstrapOutcome;
pub use catalog::{StoreCatalogEntry, StoreCatalogPage};
pub use delta::DeltaReport;
pub use push::PushReport;
pub use transport::Transport;

use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{EngramError, Result};
use crate::store::Store;

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Clone, Default)]
pub struct SyncContext {
    pub cancel: CancellationToken,
}

/// Ties the Store to a transport and a clock. Generic over `Transport` the
/// way the store's own sync scaffolding was generic over a domain applier —
/// one seam, not the teacher's two parallel designs (see DESIGN.md).
pub struct SyncEngine<'a> {
    pub(crate) store: &'a Store,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) retry: RetryPolicy,
    pub(crate) store_id: String,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a Store,
        transport: &'a dyn Transport,
        clock: &'a dyn Clock,
        retry: RetryPolicy,
        store_id: impl Into<String>,
    ) -> Result<Self> {
        let store_id = store_id.into();
        validate_store_id(&store_id)?;
        Ok(SyncEngine { store, transport, clock, retry, store_id })
    }
}

/// A path-style store identifier: 1-4 segments of `[a-z0-9-]`, each 1-64
/// chars, no leading/trailing/double hyphen, joined by `/`.
pub fn validate_store_id(id: &str) -> Result<()> {
    let segments: Vec<&str> = id.split('/').collect();
    if segments.is_empty() || segments.len() > 4 {
        return Err(invalid_store_id(id));
    }
    for seg in &segments {
        if seg.is_empty() || seg.len() > 64 {
            return Err(invalid_store_id(id));
        }
        if seg.starts_with('-') || seg.ends_with('-') || seg.contains("--") {
            return Err(invalid_store_id(id));
        }
        if !seg.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(invalid_store_id(id));
        }
    }
    Ok(())
}

fn invalid_store_id(id: &str) -> EngramError {
    EngramError::Validation {
        field: "store_id".into(),
        reason: format!("'{id}' is not a valid store identifier"),
    }
}
