use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Store;
use super::lore::{append_change_log, lore_for_tx};
use crate::error::{EngramError, Result};
use crate::model::{ChangeOp, Lore};

impl Store {
    /// Apply a feedback delta to `id` in one transaction: load current
    /// confidence, clamp the new value, update the row, advance
    /// validation_count/last_validated_at only if `is_helpful`, and write a
    /// change-log upsert carrying the full updated entity (I2, I3).
    pub fn apply_feedback(&self, id: &str, delta: f64, is_helpful: bool) -> Result<Lore> {
        let span = tracing::debug_span!("store.apply_feedback", id = %id, delta, is_helpful);
        let _enter = span.enter();

        let updated = self.with_tx(|tx| {
            let row: Option<(f64, i64)> = tx
                .query_row(
                    "SELECT confidence, validation_count FROM lore WHERE id=?1 AND deleted_at IS NULL",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            let (confidence, validation_count) = row.ok_or(EngramError::NotFound)?;

            let new_confidence = (confidence + delta).clamp(0.0, 1.0);
            let now = Utc::now();
            let new_validation_count = if is_helpful { validation_count + 1 } else { validation_count };

            if is_helpful {
                tx.execute(
                    "UPDATE lore SET confidence=?1, validation_count=?2, last_validated_at=?3, updated_at=?3
                     WHERE id=?4",
                    params![
                        new_confidence,
                        new_validation_count,
                        now.to_rfc3339(),
                        id
                    ],
                )?;
            } else {
                tx.execute(
                    "UPDATE lore SET confidence=?1, updated_at=?2 WHERE id=?3",
                    params![new_confidence, now.to_rfc3339(), id],
                )?;
            }

            let source_id: String = tx.query_row(
                "SELECT source_id FROM lore WHERE id=?1",
                params![id],
                |r| r.get(0),
            )?;

            let updated = lore_for_tx(tx, id)?;
            append_change_log(
                tx,
                id,
                ChangeOp::Upsert,
                Some(serde_json::to_value(&updated)?),
                &source_id,
                updated.created_at,
            )?;
            Ok(updated)
        })?;
        tracing::info!(id = %id, confidence = updated.confidence, "feedback applied");
        Ok(updated)
    }
}
