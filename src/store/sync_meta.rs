use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::error::Result;
use crate::model::StoreStats;

impl Store {
    pub fn get_sync_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT v FROM sync_meta WHERE k=?1", params![key], |r| r.get(0))
                .optional()?)
        })
    }

    pub fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_meta(k,v) VALUES(?1,?2)
                 ON CONFLICT(k) DO UPDATE SET v=excluded.v",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// This client's stable replica identity, generated on first open.
    pub fn source_id(&self) -> Result<String> {
        Ok(self.get_sync_meta("source_id")?.unwrap_or_default())
    }

    pub fn last_push_seq(&self) -> Result<i64> {
        Ok(self
            .get_sync_meta("last_push_seq")?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    pub fn last_pull_seq(&self) -> Result<i64> {
        Ok(self
            .get_sync_meta("last_pull_seq")?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    /// Advance `last_push_seq`. Never decreases (I6) — callers only ever
    /// pass a value >= the current cursor, but we clamp defensively here
    /// too since this is the one place the invariant can be violated by a
    /// caller bug.
    pub fn set_last_push_seq(&self, seq: i64) -> Result<()> {
        let current = self.last_push_seq()?;
        self.set_sync_meta("last_push_seq", &seq.max(current).to_string())
    }

    pub fn set_last_pull_seq(&self, seq: i64) -> Result<()> {
        let current = self.last_pull_seq()?;
        self.set_sync_meta("last_pull_seq", &seq.max(current).to_string())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let total_lore: i64 =
                conn.query_row("SELECT COUNT(*) FROM lore WHERE deleted_at IS NULL", [], |r| r.get(0))?;

            let mut by_category = Vec::new();
            let mut stmt = conn.prepare(
                "SELECT category, COUNT(*) FROM lore WHERE deleted_at IS NULL GROUP BY category",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                by_category.push(row?);
            }

            let mut by_embedding_status = Vec::new();
            let mut stmt = conn.prepare(
                "SELECT embedding_status, COUNT(*) FROM lore WHERE deleted_at IS NULL GROUP BY embedding_status",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                by_embedding_status.push(row?);
            }

            let source_id: String = conn
                .query_row("SELECT v FROM sync_meta WHERE k='source_id'", [], |r| r.get(0))
                .unwrap_or_default();
            let pending_sync: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM change_log WHERE source_id=?1 AND sequence > (
                        SELECT CAST(v AS INTEGER) FROM sync_meta WHERE k='last_push_seq'
                     )",
                    params![source_id],
                    |r| r.get(0),
                )
                .unwrap_or(0);
            let last_pull_seq: i64 = conn
                .query_row("SELECT v FROM sync_meta WHERE k='last_pull_seq'", [], |r| {
                    r.get::<_, String>(0)
                })
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let last_push_cursor: i64 = conn
                .query_row("SELECT v FROM sync_meta WHERE k='last_push_seq'", [], |r| {
                    r.get::<_, String>(0)
                })
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            Ok(StoreStats {
                total_lore,
                by_category,
                by_embedding_status,
                pending_sync,
                last_push_seq: last_push_cursor,
                last_pull_seq,
            })
        })
    }
}
