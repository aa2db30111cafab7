use crate::error::{EngramError, Result};
use crate::model::{ChangeOp, Lore};

use super::SyncEngine;

const DELTA_PAGE_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default)]
pub struct DeltaReport {
    pub pages_applied: u32,
    pub entries_applied: u64,
    pub entries_skipped_self_echo: u64,
    pub last_pull_seq: i64,
}

impl<'a> SyncEngine<'a> {
    /// Apply the remote change log, paginating until `has_more` is false.
    /// Entries authored by this client's own `source_id` are skipped
    /// (self-echo); applied entries never produce local change-log rows
    /// (I7).
    pub fn delta(&self, ctx: &super::SyncContext) -> Result<DeltaReport> {
        let own_source_id = self.store.source_id()?;
        let mut cursor = self.store.last_pull_seq()?;
        let mut report = DeltaReport { last_pull_seq: cursor, ..Default::default() };

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            let page = self.transport.delta(&self.store_id, cursor, DELTA_PAGE_LIMIT)?;

            let mut entries = page.entries;
            entries.sort_by_key(|e| e.sequence);

            for entry in &entries {
                if ctx.cancel.is_cancelled() {
                    return Err(EngramError::Cancelled);
                }
                if entry.source_id == own_source_id {
                    report.entries_skipped_self_echo += 1;
                    tracing::debug!(sequence = entry.sequence, "delta self-echo skipped");
                    continue;
                }
                match entry.operation {
                    ChangeOp::Upsert => {
                        let payload = entry.payload.clone().ok_or_else(|| {
                            EngramError::Validation {
                                field: "payload".into(),
                                reason: "upsert entry missing payload".into(),
                            }
                        })?;
                        let mut lore: Lore = serde_json::from_value(payload)?;
                        lore.embedding_status = crate::model::EmbeddingStatus::Pending;
                        self.store.upsert_lore(&lore)?;
                    }
                    ChangeOp::Delete => {
                        match self.store.delete_lore_by_id(&entry.entity_id, entry.received_at) {
                            Ok(()) | Err(EngramError::NotFound) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                report.entries_applied += 1;
            }

            report.pages_applied += 1;
            cursor = page.last_sequence;
            self.store.set_last_pull_seq(cursor)?;
            report.last_pull_seq = cursor;
            tracing::info!(cursor, applied = report.entries_applied, "delta page applied");

            if !page.has_more {
                break;
            }
        }
        Ok(report)
    }
}
