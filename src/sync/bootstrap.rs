use std::io::Cursor;

use chrono::Utc;

use crate::error::{EngramError, Result};

use super::SyncEngine;
use super::transport::SnapshotOutcome;

const SNAPSHOT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub source_id: String,
    pub last_pull_seq: i64,
    pub embedding_model: String,
}

impl<'a> SyncEngine<'a> {
    /// Full-snapshot replacement of the local store from the remote,
    /// recovering first-install or irreparable divergence.
    pub fn bootstrap(&self, ctx: &super::SyncContext) -> Result<BootstrapOutcome> {
        let span = tracing::info_span!("sync.bootstrap", store_id = %self.store_id);
        let _enter = span.enter();

        let health = self.transport.health()?;
        let local_model = self.store.get_store_meta("embedding_model")?;
        if let Some(local_model) = &local_model {
            if local_model != &health.embedding_model {
                return Err(EngramError::ModelMismatch {
                    local: local_model.clone(),
                    remote: health.embedding_model.clone(),
                });
            }
        }

        let body = self.fetch_snapshot_with_retry(ctx)?;

        self.store.replace_from_snapshot(Cursor::new(body))?;

        let last_pull_seq = self.store.max_change_log_sequence()?;
        self.store.set_sync_meta("last_push_seq", "0")?;
        self.store.set_sync_meta("last_pull_seq", &last_pull_seq.to_string())?;

        let fresh_source_id = uuid::Uuid::new_v4().to_string();
        self.store.set_sync_meta("source_id", &fresh_source_id)?;
        self.store.set_store_meta("embedding_model", &health.embedding_model)?;
        self.store.set_store_meta("last_sync_at", &Utc::now().to_rfc3339())?;

        tracing::info!(source_id = %fresh_source_id, last_pull_seq, "bootstrap complete");
        Ok(BootstrapOutcome {
            source_id: fresh_source_id,
            last_pull_seq,
            embedding_model: health.embedding_model,
        })
    }

    fn fetch_snapshot_with_retry(&self, ctx: &super::SyncContext) -> Result<Vec<u8>> {
        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            if ctx.cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            match self.transport.snapshot(&self.store_id)? {
                SnapshotOutcome::Body(bytes) => return Ok(bytes),
                SnapshotOutcome::Retry { after } => {
                    tracing::warn!(attempt, ?after, "snapshot unavailable, retrying");
                    if attempt == SNAPSHOT_ATTEMPTS {
                        break;
                    }
                    self.clock.sleep(after);
                }
            }
        }
        Err(EngramError::SnapshotUnavailable)
    }
}
