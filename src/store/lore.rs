use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction, params};

use super::Store;
use crate::error::{EngramError, Result};
use crate::model::{Category, ChangeOp, EmbeddingStatus, Lore, LORE_TABLE};

fn row_to_lore(row: &Row<'_>) -> rusqlite::Result<Lore> {
    let category_str: String = row.get("category")?;
    let embedding_status_str: String = row.get("embedding_status")?;
    let sources_str: String = row.get("sources")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_validated_at: Option<String> = row.get("last_validated_at")?;
    let synced_at: Option<String> = row.get("synced_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;

    Ok(Lore {
        id: row.get("id")?,
        content: row.get("content")?,
        context: row.get("context")?,
        category: Category::parse(&category_str).unwrap_or(Category::PatternOutcome),
        confidence: row.get("confidence")?,
        embedding: row.get("embedding")?,
        embedding_status: EmbeddingStatus::parse(&embedding_status_str),
        source_id: row.get("source_id")?,
        sources: serde_json::from_str(&sources_str).unwrap_or_default(),
        validation_count: row.get::<_, i64>("validation_count")? as u64,
        last_validated_at: last_validated_at.and_then(|s| parse_dt(&s)),
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_dt(&updated_at).unwrap_or_else(Utc::now),
        synced_at: synced_at.and_then(|s| parse_dt(&s)),
        deleted_at: deleted_at.and_then(|s| parse_dt(&s)),
    })
}

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

const SELECT_COLUMNS: &str = "id, content, context, category, confidence, embedding, \
     embedding_status, source_id, sources, validation_count, last_validated_at, \
     created_at, updated_at, synced_at, deleted_at";

/// Filters accepted by `Store::query`. `min_confidence: None` means the
/// floor is disabled entirely, distinct from `Some(0.0)` (see §4.3).
#[derive(Debug, Clone, Default)]
pub struct LoreFilter {
    pub categories: Option<Vec<Category>>,
    pub min_confidence: Option<f64>,
    pub max_results: Option<usize>,
    pub require_embedding: bool,
}

impl Store {
    /// Validate and insert a new lore row. Writes exactly one change-log
    /// entry (operation=upsert) in the same transaction (I1).
    pub fn insert_lore(&self, lore: &Lore) -> Result<()> {
        let span = tracing::debug_span!("store.insert_lore", id = %lore.id);
        let _enter = span.enter();
        lore.validate()?;

        self.with_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row("SELECT 1 FROM lore WHERE id=?1", params![lore.id], |_| Ok(1))
                .optional()?;
            if existing.is_some() {
                return Err(EngramError::Duplicate);
            }
            insert_row(tx, lore)?;
            append_change_log(
                tx,
                &lore.id,
                ChangeOp::Upsert,
                Some(serde_json::to_value(lore)?),
                &lore.source_id,
                lore.created_at,
            )?;
            Ok(())
        })?;
        tracing::info!(id = %lore.id, "lore inserted");
        Ok(())
    }

    /// Insert-or-replace semantics for inbound delta application. Does NOT
    /// write a change-log entry (I7). Missing embedding_status defaults to
    /// pending, matching the payload coming from a remote upsert.
    pub fn upsert_lore(&self, lore: &Lore) -> Result<()> {
        let span = tracing::debug_span!("store.upsert_lore", id = %lore.id);
        let _enter = span.enter();
        self.with_tx(|tx| {
            insert_row(tx, lore)?;
            Ok(())
        })
    }

    /// Soft-delete by id. Does NOT write a change-log entry (I7).
    pub fn delete_lore_by_id(&self, id: &str, tombstone_time: DateTime<Utc>) -> Result<()> {
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE lore SET deleted_at=?1, updated_at=?1 WHERE id=?2",
                params![fmt_dt(tombstone_time), id],
            )?;
            if updated == 0 {
                return Err(EngramError::NotFound);
            }
            Ok(())
        })
    }

    /// Return the entity, or `NotFound` if missing or soft-deleted.
    pub fn get(&self, id: &str) -> Result<Lore> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM lore WHERE id=?1 AND deleted_at IS NULL"
            );
            conn.query_row(&sql, params![id], row_to_lore)
                .optional()?
                .ok_or(EngramError::NotFound)
        })
    }

    /// Return the lore that exist among `ids`, silently omitting absent or
    /// soft-deleted ones.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Lore>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM lore WHERE deleted_at IS NULL AND id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_lore)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Read non-deleted lore matching `filter`. Ordering/truncation for
    /// similarity ranking is layered on top by the Query Engine; this is the
    /// raw candidate read described in §4.3 step 1.
    pub fn query(&self, filter: &LoreFilter) -> Result<Vec<Lore>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {SELECT_COLUMNS} FROM lore WHERE deleted_at IS NULL");
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if filter.require_embedding {
                sql.push_str(" AND embedding IS NOT NULL");
            }
            if let Some(min_conf) = filter.min_confidence {
                sql.push_str(" AND confidence >= ?");
                bind.push(Box::new(min_conf));
            }
            if let Some(categories) = &filter.categories {
                if categories.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = categories.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                sql.push_str(&format!(" AND category IN ({placeholders})"));
                for c in categories {
                    bind.push(Box::new(c.as_str().to_string()));
                }
            }
            sql.push_str(" ORDER BY created_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_lore)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            if let Some(max) = filter.max_results {
                out.truncate(max);
            }
            Ok(out)
        })
    }

    /// Remove all rows in `lore` and `change_log` within one transaction,
    /// leaving schema intact. Used by administrative clear / reinitialize.
    pub fn clear_all_lore(&self) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM lore", [])?;
            tx.execute("DELETE FROM change_log", [])?;
            Ok(())
        })
    }
}

fn insert_row(tx: &Transaction<'_>, lore: &Lore) -> Result<()> {
    tx.execute(
        "INSERT INTO lore (
            id, content, context, category, confidence, embedding, embedding_status,
            source_id, sources, validation_count, last_validated_at,
            created_at, updated_at, synced_at, deleted_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        ON CONFLICT(id) DO UPDATE SET
            content=excluded.content,
            context=excluded.context,
            category=excluded.category,
            confidence=excluded.confidence,
            embedding=excluded.embedding,
            embedding_status=excluded.embedding_status,
            source_id=excluded.source_id,
            sources=excluded.sources,
            validation_count=excluded.validation_count,
            last_validated_at=excluded.last_validated_at,
            updated_at=excluded.updated_at,
            synced_at=excluded.synced_at,
            deleted_at=excluded.deleted_at",
        params![
            lore.id,
            lore.content,
            lore.context,
            lore.category.as_str(),
            lore.confidence,
            lore.embedding,
            lore.embedding_status.as_str(),
            lore.source_id,
            serde_json::to_string(&lore.sources)?,
            lore.validation_count as i64,
            lore.last_validated_at.map(fmt_dt),
            fmt_dt(lore.created_at),
            fmt_dt(lore.updated_at),
            lore.synced_at.map(fmt_dt),
            lore.deleted_at.map(fmt_dt),
        ],
    )?;
    Ok(())
}

pub(super) fn lore_for_tx(tx: &Transaction<'_>, id: &str) -> Result<Lore> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM lore WHERE id=?1");
    Ok(tx.query_row(&sql, params![id], row_to_lore)?)
}

pub(super) fn append_change_log(
    tx: &Transaction<'_>,
    entity_id: &str,
    operation: ChangeOp,
    payload: Option<serde_json::Value>,
    source_id: &str,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let now = fmt_dt(Utc::now());
    tx.execute(
        "INSERT INTO change_log (table_name, entity_id, operation, payload, source_id, created_at, received_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            LORE_TABLE,
            entity_id,
            operation.as_str(),
            payload.map(|p| p.to_string()),
            source_id,
            fmt_dt(created_at),
            now,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}
