use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use hivetrace_types::{SyncOpKind, SyncOperation, SyncStatus};

use crate::db::Database;
use crate::error::Result;

fn op_from_row(row: &Row<'_>) -> rusqlite::Result<SyncOperation> {
    let kind: String = row.get(1)?;
    let status: String = row.get(8)?;
    Ok(SyncOperation {
        id: Some(row.get(0)?),
        kind: SyncOpKind::parse(&kind).unwrap_or(SyncOpKind::Set),
        key: row.get(2)?,
        value: row.get(3)?,
        field: row.get(4)?,
        score: row.get(5)?,
        ttl_secs: row.get::<_, Option<i64>>(6)?.map(|t| t as u64),
        created_at: row.get(7)?,
        status: SyncStatus::parse(&status).unwrap_or(SyncStatus::Pending),
        attempts: row.get::<_, i64>(9)? as u32,
        last_attempt: row.get(10)?,
    })
}

const SYNC_COLUMNS: &str =
    "id, kind, key, value, field, score, ttl_secs, created_at, status, attempts, last_attempt";

/// Queue counters surfaced by `GET /api/sync/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueStats {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_pending_at: Option<i64>,
}

impl Database {
    pub fn enqueue_sync_op(&self, op: &SyncOperation) -> Result<i64> {
        self.conn().execute(
            r#"
            INSERT INTO sync_queue (kind, key, value, field, score, ttl_secs, created_at, status, attempts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0)
            "#,
            params![
                op.kind.as_str(),
                &op.key,
                &op.value,
                &op.field,
                &op.score,
                op.ttl_secs.map(|t| t as i64),
                op.created_at,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Oldest pending operations first; per-key FIFO follows from the
    /// global created-order.
    pub fn pending_sync_ops(&self, limit: usize) -> Result<Vec<SyncOperation>> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT ?1",
            SYNC_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let ops = stmt
            .query_map([limit as i64], op_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }

    /// Mark a replayed operation synced and bump its attempt bookkeeping in
    /// one statement. Counter kinds rely on this being atomic with the
    /// worker's replay loop to bound over-counting to crash windows.
    pub fn mark_sync_op_synced(&self, id: i64, now: i64) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE sync_queue
            SET status = 'synced', attempts = attempts + 1, last_attempt = ?2
            WHERE id = ?1
            "#,
            params![id, now],
        )?;
        Ok(())
    }

    /// Record a failed replay attempt. The row stays pending until it has
    /// burned `max_retries` attempts, then flips to failed.
    pub fn mark_sync_op_failed_attempt(
        &self,
        id: i64,
        now: i64,
        max_retries: u32,
    ) -> Result<SyncStatus> {
        self.conn().execute(
            r#"
            UPDATE sync_queue
            SET attempts = attempts + 1,
                last_attempt = ?2,
                status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END
            WHERE id = ?1
            "#,
            params![id, now, max_retries as i64],
        )?;

        let status: String = self.conn().query_row(
            "SELECT status FROM sync_queue WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(SyncStatus::parse(&status).unwrap_or(SyncStatus::Pending))
    }

    pub fn count_pending_sync_ops(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn sync_queue_stats(&self) -> Result<SyncQueueStats> {
        let mut stats = SyncQueueStats {
            pending: 0,
            synced: 0,
            failed: 0,
            oldest_pending_at: None,
        };

        let mut stmt = self
            .conn()
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match status.as_str() {
                "pending" => stats.pending = count as u64,
                "synced" => stats.synced = count as u64,
                "failed" => stats.failed = count as u64,
                _ => {}
            }
        }

        stats.oldest_pending_at = self.conn().query_row(
            "SELECT MIN(created_at) FROM sync_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;

        Ok(stats)
    }

    /// Drop synced bookkeeping rows older than the cutoff.
    pub fn purge_synced_ops_before(&self, cutoff: i64) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM sync_queue WHERE status = 'synced' AND created_at < ?1",
            [cutoff],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: SyncOpKind, key: &str, created_at: i64) -> SyncOperation {
        SyncOperation::new(kind, key, created_at).with_value("1")
    }

    #[test]
    fn pending_ops_come_back_in_created_order() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue_sync_op(&op(SyncOpKind::Hincrby, "metrics:h", 3000))
            .unwrap();
        db.enqueue_sync_op(&op(SyncOpKind::Set, "a", 1000)).unwrap();
        db.enqueue_sync_op(&op(SyncOpKind::Sadd, "agents", 2000))
            .unwrap();

        let pending = db.pending_sync_ops(10).unwrap();
        let keys: Vec<&str> = pending.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "agents", "metrics:h"]);
    }

    #[test]
    fn failed_attempts_exhaust_into_failed_status() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .enqueue_sync_op(&op(SyncOpKind::Zincrby, "tools", 1000))
            .unwrap();

        assert_eq!(
            db.mark_sync_op_failed_attempt(id, 2000, 3).unwrap(),
            SyncStatus::Pending
        );
        assert_eq!(
            db.mark_sync_op_failed_attempt(id, 3000, 3).unwrap(),
            SyncStatus::Pending
        );
        assert_eq!(
            db.mark_sync_op_failed_attempt(id, 4000, 3).unwrap(),
            SyncStatus::Failed
        );

        // Failed rows leave the pending pool
        assert_eq!(db.count_pending_sync_ops().unwrap(), 0);
        let stats = db.sync_queue_stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.oldest_pending_at, None);
    }

    #[test]
    fn synced_rows_purge_by_age() {
        let db = Database::open_in_memory().unwrap();
        let a = db.enqueue_sync_op(&op(SyncOpKind::Set, "a", 1000)).unwrap();
        let b = db.enqueue_sync_op(&op(SyncOpKind::Set, "b", 5000)).unwrap();
        db.mark_sync_op_synced(a, 1500).unwrap();
        db.mark_sync_op_synced(b, 5500).unwrap();

        let deleted = db.purge_synced_ops_before(2000).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.sync_queue_stats().unwrap().synced, 1);
    }
}
