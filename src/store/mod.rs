//! Sole custodian of all persistent invariants. Every mutation reaches disk
//! through a method on [`Store`]; external components never perform raw
//! writes against the connection.

mod changelog;
mod feedback;
mod lore;
mod snapshot;
mod sync_meta;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{EngramError, Result};

pub use lore::LoreFilter;

const SCHEMA_VERSION: i32 = 1;

/// Embedded durable store: one SQLite connection guarded by a mutex. WAL
/// mode plus the mutex is sufficient for the embedded single-process case;
/// a connection pool would buy nothing a single writer doesn't already give.
pub struct Store {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open (creating if absent) the store at `path`. Creates parent
    /// directories, enables WAL, initializes schema idempotently, and
    /// establishes the indexes the query paths rely on.
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        let store = Store {
            conn: Mutex::new(Some(conn)),
            path,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store, primarily for tests.
    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Mutex::new(Some(conn)),
            path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.conn.lock().unwrap();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(EngramError::StoreClosed),
        }
    }

    fn with_tx<R>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<R>) -> Result<R> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }

    fn init_schema(&self) -> Result<()> {
        let span = tracing::debug_span!("store.init_schema");
        let _enter = span.enter();
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS lore (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    context TEXT,
    category TEXT NOT NULL,
    confidence REAL NOT NULL,
    embedding BLOB,
    embedding_status TEXT NOT NULL DEFAULT 'pending',
    source_id TEXT NOT NULL,
    sources TEXT NOT NULL,
    validation_count INTEGER NOT NULL DEFAULT 0,
    last_validated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_lore_category ON lore(category);
CREATE INDEX IF NOT EXISTS idx_lore_confidence ON lore(confidence);
CREATE INDEX IF NOT EXISTS idx_lore_created_at ON lore(created_at);
CREATE INDEX IF NOT EXISTS idx_lore_deleted_at ON lore(deleted_at);
CREATE INDEX IF NOT EXISTS idx_lore_synced_at ON lore(synced_at);
CREATE INDEX IF NOT EXISTS idx_lore_last_validated_at ON lore(last_validated_at);

CREATE TABLE IF NOT EXISTS change_log (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK(operation IN ('upsert','delete')),
    payload TEXT,
    source_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_log_source_seq ON change_log(source_id, sequence);

CREATE TABLE IF NOT EXISTS store_meta (
    k TEXT PRIMARY KEY,
    v TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_meta (
    k TEXT PRIMARY KEY,
    v TEXT NOT NULL
);
"#,
            )?;
            conn.execute(
                "INSERT INTO store_meta(k,v) VALUES('schema_version', ?1)
                 ON CONFLICT(k) DO NOTHING",
                rusqlite::params![SCHEMA_VERSION.to_string()],
            )?;
            conn.execute(
                "INSERT INTO sync_meta(k,v) VALUES('last_push_seq','0')
                 ON CONFLICT(k) DO NOTHING",
                [],
            )?;
            conn.execute(
                "INSERT INTO sync_meta(k,v) VALUES('last_pull_seq','0')
                 ON CONFLICT(k) DO NOTHING",
                [],
            )?;
            let has_source_id: Option<String> = conn
                .query_row(
                    "SELECT v FROM sync_meta WHERE k='source_id'",
                    [],
                    |r| r.get(0),
                )
                .ok();
            if has_source_id.is_none() {
                let fresh = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO sync_meta(k,v) VALUES('source_id', ?1)",
                    rusqlite::params![fresh],
                )?;
            }
            Ok(())
        })
    }

    pub fn schema_version(&self) -> Result<i32> {
        self.with_conn(|conn| {
            let v: Option<String> = conn
                .query_row("SELECT v FROM store_meta WHERE k='schema_version'", [], |r| r.get(0))
                .ok();
            Ok(v.and_then(|s| s.parse().ok()).unwrap_or(SCHEMA_VERSION))
        })
    }

    pub fn get_store_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT v FROM store_meta WHERE k=?1", rusqlite::params![key], |r| {
                    r.get(0)
                })
                .ok())
        })
    }

    pub fn set_store_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO store_meta(k,v) VALUES(?1,?2)
                 ON CONFLICT(k) DO UPDATE SET v=excluded.v",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
    }

    /// Flush and close the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| EngramError::Sqlite(e))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().unwrap().is_none()
    }
}
