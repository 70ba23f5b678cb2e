use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::schema::SCHEMA;

// NOTE: Concurrency Model
//
// One logical connection, single writer. WAL keeps readers off the writer's
// back, and every caller goes through the same `Database` handle behind a
// mutex owned by the server. Statement execution is synchronous; the hot
// ingest path does exactly one insert plus the metric transaction.

/// Authoritative store for events, aggregates, relationships, the sync
/// queue, and terminal status.
pub struct Database {
    conn: Connection,
    storage_dir: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database file under the storage directory and
    /// apply the schema.
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let conn = Connection::open(storage_dir.join("hivetrace.db"))?;

        let db = Self {
            conn,
            storage_dir: Some(storage_dir.to_path_buf()),
        };
        db.init()?;
        db.init_storage_layout()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            storage_dir: None,
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "busy_timeout", 5000)?;
        self.conn.pragma_update(None, "cache_size", -64000)?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Create the on-disk layout next to the database file:
    /// `handoffs/`, `metrics/{hourly,daily,agents}/`,
    /// `terminal/{active,completed}/`, `sync/`.
    fn init_storage_layout(&self) -> Result<()> {
        if let Some(root) = &self.storage_dir {
            for sub in [
                "handoffs",
                "metrics/hourly",
                "metrics/daily",
                "metrics/agents",
                "terminal/active",
                "terminal/completed",
                "sync",
            ] {
                std::fs::create_dir_all(root.join(sub))?;
            }
        }
        Ok(())
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Current size of the database in bytes (page count times page size).
    pub fn size_bytes(&self) -> Result<u64> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Truncate the WAL into the main file; called on graceful shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly() {
        let db = Database::open_in_memory().unwrap();
        // Re-applying must be a no-op (IF NOT EXISTS everywhere)
        db.conn().execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn open_creates_storage_layout() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert!(dir.path().join("hivetrace.db").exists());
        assert!(dir.path().join("handoffs").is_dir());
        assert!(dir.path().join("metrics/hourly").is_dir());
        assert!(dir.path().join("terminal/active").is_dir());
        assert!(dir.path().join("sync").is_dir());
        drop(db);
    }
}
