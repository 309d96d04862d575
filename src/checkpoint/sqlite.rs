//! SQLite checkpoint backend
//!
//! One row per item, upserted on every transition. Run start and finish are recorded in
//! the `runs` table so `--stats` can report how the last run ended.

use crate::checkpoint::schema::initialize_schema;
use crate::checkpoint::traits::{
    check_transition, CheckpointError, CheckpointResult, CheckpointStore,
};
use crate::checkpoint::{CheckpointRecord, CheckpointSnapshot, RunRecord, RunStatus};
use crate::state::ItemStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

/// SQLite checkpoint backend
pub struct SqliteCheckpointStore {
    conn: Connection,
    run_id: Option<i64>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) a checkpoint database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCheckpointStore)` - Successfully opened/created database
    /// * `Err(CheckpointError)` - Failed to open database
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Every committed transition must survive power loss
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn, run_id: None })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> CheckpointResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, run_id: None })
    }

    fn current_status(&self, id: &str) -> CheckpointResult<Option<ItemStatus>> {
        let status: Option<String> = self
            .conn
            .query_row("SELECT status FROM items WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        status.map(|s| item_status(id, &s)).transpose()
    }

    fn upsert(&mut self, id: &str, status: ItemStatus, error: Option<&str>) -> CheckpointResult<()> {
        check_transition(id, self.current_status(id)?, status)?;

        let now = Utc::now().to_rfc3339();
        let started = i64::from(status == ItemStatus::InProgress);
        self.conn.execute(
            "INSERT INTO items (id, status, error, attempts, updated_at, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                attempts = items.attempts + ?4,
                updated_at = excluded.updated_at,
                run_id = COALESCE(excluded.run_id, items.run_id)",
            params![id, status.to_db_string(), error, started, now, self.run_id],
        )?;
        Ok(())
    }

    /// Number of times an item has been picked up, across all runs
    pub fn attempts(&self, id: &str) -> CheckpointResult<u32> {
        let attempts: Option<u32> = self
            .conn
            .query_row("SELECT attempts FROM items WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(attempts.unwrap_or(0))
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&mut self) -> CheckpointResult<CheckpointSnapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, status, error, updated_at FROM items")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut snapshot = CheckpointSnapshot::default();
        for row in rows {
            let (id, status, error, updated_at) = row?;
            let status = item_status(&id, &status)?;
            let timestamp = DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| CheckpointError::CorruptRow {
                    table: "items",
                    id: id.clone(),
                    message: format!("bad timestamp '{}': {}", updated_at, e),
                })?;

            snapshot.apply(CheckpointRecord {
                id,
                status,
                error,
                timestamp,
            });
        }
        Ok(snapshot)
    }

    fn status(&mut self, id: &str) -> CheckpointResult<Option<ItemStatus>> {
        self.current_status(id)
    }

    fn mark_in_progress(&mut self, id: &str) -> CheckpointResult<()> {
        self.upsert(id, ItemStatus::InProgress, None)
    }

    fn mark_completed(&mut self, id: &str) -> CheckpointResult<()> {
        self.upsert(id, ItemStatus::Completed, None)
    }

    fn mark_failed(&mut self, id: &str, reason: &str) -> CheckpointResult<()> {
        self.upsert(id, ItemStatus::Failed, Some(reason))
    }

    fn reset(&mut self) -> CheckpointResult<()> {
        self.conn.execute("DELETE FROM items", [])?;
        Ok(())
    }

    // ===== Run Tracking =====

    fn begin_run(&mut self, config_hash: &str) -> CheckpointResult<()> {
        // A run still marked running was killed before it could finish
        self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE status = ?2",
            params![
                RunStatus::Interrupted.to_db_string(),
                RunStatus::Running.to_db_string()
            ],
        )?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        self.run_id = Some(self.conn.last_insert_rowid());
        Ok(())
    }

    fn finish_run(&mut self, status: RunStatus) -> CheckpointResult<()> {
        if let Some(run_id) = self.run_id.take() {
            let now = Utc::now().to_rfc3339();
            self.conn.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
                params![status.to_db_string(), now, run_id],
            )?;
        }
        Ok(())
    }

    fn latest_run(&self) -> CheckpointResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
        )?;

        let run = stmt
            .query_row([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;

        let Some((id, started_at, finished_at, config_hash, status)) = run else {
            return Ok(None);
        };
        let status = RunStatus::from_db_string(&status).ok_or_else(|| CheckpointError::CorruptRow {
            table: "runs",
            id: id.to_string(),
            message: format!("unknown run status '{}'", status),
        })?;

        Ok(Some(RunRecord {
            id,
            started_at,
            finished_at,
            config_hash,
            status,
        }))
    }
}

fn item_status(id: &str, raw: &str) -> CheckpointResult<ItemStatus> {
    ItemStatus::from_db_string(raw).ok_or_else(|| CheckpointError::CorruptRow {
        table: "items",
        id: id.to_string(),
        message: format!("unknown status '{}'", raw),
    })
}
