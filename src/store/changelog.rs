use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Store;
use crate::error::Result;
use crate::model::{ChangeLogEntry, ChangeOp};

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store {
    /// Change-log rows authored by `own_source_id` with sequence >
    /// `after_seq`, ordered ascending, up to `limit`. This is what Push
    /// drains.
    pub fn unpushed_changes(
        &self,
        own_source_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<ChangeLogEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence, table_name, entity_id, operation, payload, source_id, created_at, received_at
                 FROM change_log
                 WHERE source_id=?1 AND sequence > ?2
                 ORDER BY sequence ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![own_source_id, after_seq, limit], |r| {
                let op: String = r.get(3)?;
                let payload: Option<String> = r.get(4)?;
                let created_at: String = r.get(6)?;
                let received_at: String = r.get(7)?;
                Ok(ChangeLogEntry {
                    sequence: r.get(0)?,
                    table_name: r.get(1)?,
                    entity_id: r.get(2)?,
                    operation: ChangeOp::parse(&op),
                    payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                    source_id: r.get(5)?,
                    created_at: parse_dt(&created_at),
                    received_at: parse_dt(&received_at),
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Count of this client's change-log rows not yet reflected in
    /// `last_push_seq`. Used by `has_pending_sync` and `Reinitialize`.
    pub fn pending_sync_count(&self, own_source_id: &str, after_seq: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM change_log WHERE source_id=?1 AND sequence > ?2",
                params![own_source_id, after_seq],
                |r| r.get(0),
            )?)
        })
    }

    pub fn has_pending_sync(&self, own_source_id: &str, after_seq: i64) -> Result<bool> {
        Ok(self.pending_sync_count(own_source_id, after_seq)? > 0)
    }

    /// Highest sequence currently present in the change log (0 if empty).
    /// Used to (re)initialize `last_pull_seq` after a snapshot replace.
    pub fn max_change_log_sequence(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COALESCE(MAX(sequence), 0) FROM change_log", [], |r| {
                r.get(0)
            })?)
        })
    }
}
