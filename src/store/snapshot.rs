use std::io::{Read, Write};

use rusqlite::Connection;

use super::Store;
use crate::error::{EngramError, Result};

impl Store {
    /// Stream `reader` into a sibling file, open it as a database, and run
    /// an integrity self-check. Only on success is it renamed into place of
    /// the live database; on any failure the existing database is left
    /// completely untouched.
    pub fn replace_from_snapshot(&self, mut reader: impl Read) -> Result<()> {
        let span = tracing::debug_span!("store.replace_from_snapshot");
        let _enter = span.enter();

        if self.path.as_os_str() == ":memory:" {
            return self.replace_in_memory(&mut reader);
        }

        let tmp_path = sibling_path(&self.path, ".snapshot.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            std::io::copy(&mut reader, &mut file)?;
            file.flush()?;
        }

        let integrity_ok = check_integrity(&tmp_path);
        if !integrity_ok {
            let _ = std::fs::remove_file(&tmp_path);
            tracing::warn!("snapshot failed integrity check, store left untouched");
            return Err(EngramError::IntegrityError);
        }

        {
            let mut guard = self.conn.lock().unwrap();
            if let Some(conn) = guard.take() {
                let _ = conn.close();
            }
            std::fs::rename(&tmp_path, &self.path)?;
            let reopened = Connection::open(&self.path)?;
            *guard = Some(reopened);
        }
        tracing::info!("snapshot replaced store contents");
        Ok(())
    }

    fn replace_in_memory(&self, reader: &mut impl Read) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let tmp_dir = std::env::temp_dir();
        let tmp_path = tmp_dir.join(format!("engram-snapshot-{}.sqlite", uuid::Uuid::new_v4()));
        std::fs::write(&tmp_path, &bytes)?;
        let ok = check_integrity(&tmp_path);
        if !ok {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(EngramError::IntegrityError);
        }
        let reopened = Connection::open(&tmp_path)?;
        let _ = std::fs::remove_file(&tmp_path);
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            let _ = conn.close();
        }
        *guard = Some(reopened);
        Ok(())
    }
}

fn sibling_path(path: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("store").to_string();
    name.push_str(suffix);
    path.with_file_name(name)
}

fn check_integrity(path: &std::path::Path) -> bool {
    let conn = match Connection::open(path) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let result: rusqlite::Result<String> =
        conn.query_row("PRAGMA integrity_check", [], |r| r.get(0));
    matches!(result, Ok(ref s) if s == "ok")
}
