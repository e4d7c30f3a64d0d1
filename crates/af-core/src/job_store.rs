//! Durable SQLite store backing the feature queue.
//!
//! Every job is keyed by its feature id. Claims are transactional so a job
//! is handed to at most one worker at a time; anything left `active` by a
//! crash is put back to `waiting` by [`JobStore::recover_active`].

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::types::QueuedFeature;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown job status {other:?}"))),
        }
    }
}

/// A persisted queue entry.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub payload: QueuedFeature,
    pub priority: i64,
    pub status: JobStatus,
    /// Attempts started so far, including the current one while active.
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    /// A job with this id is already waiting, delayed or active.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Waiting jobs whose run time is still in the future.
    pub delayed: u64,
}

/// Retention applied by [`JobStore::prune_finished`].
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub completed_age: chrono::Duration,
    pub completed_keep: u32,
    pub failed_age: chrono::Duration,
}

struct RawJob {
    id: String,
    payload: String,
    priority: i64,
    status: String,
    attempts: i64,
    max_attempts: i64,
    run_at: i64,
    created_at: i64,
    result: Option<String>,
    last_error: Option<String>,
}

const JOB_COLUMNS: &str = "id, payload, priority, status, attempts, max_attempts, \
                           run_at, created_at, result, last_error";

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        payload: row.get(1)?,
        priority: row.get(2)?,
        status: row.get(3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        run_at: row.get(6)?,
        created_at: row.get(7)?,
        result: row.get(8)?,
        last_error: row.get(9)?,
    })
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {ms}")))
}

impl RawJob {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            payload: serde_json::from_str(&self.payload)?,
            status: JobStatus::parse(&self.status)?,
            run_at: millis_to_utc(self.run_at)?,
            created_at: millis_to_utc(self.created_at)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            id: self.id,
            priority: self.priority,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            last_error: self.last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

/// Async SQLite-backed job table.
#[derive(Clone)]
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) a store at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Corrupt(format!("create {parent:?}: {e}")))?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory store (useful for tests).
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS jobs (
                        id           TEXT PRIMARY KEY,
                        payload      TEXT NOT NULL,
                        priority     INTEGER NOT NULL,
                        status       TEXT NOT NULL,
                        attempts     INTEGER NOT NULL DEFAULT 0,
                        max_attempts INTEGER NOT NULL,
                        run_at       INTEGER NOT NULL,
                        seq          INTEGER NOT NULL,
                        created_at   INTEGER NOT NULL,
                        finished_at  INTEGER,
                        result       TEXT,
                        last_error   TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_jobs_ready
                        ON jobs(status, priority, seq);

                    CREATE TABLE IF NOT EXISTS queue_state (
                        key   TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enqueue / claim
    // -----------------------------------------------------------------------

    /// Insert a job keyed by the feature id. A job that is still waiting,
    /// delayed or active is left untouched; a finished one is replaced.
    pub async fn enqueue(
        &self,
        feature: &QueuedFeature,
        max_attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let id = feature.feature.id.clone();
        let payload = serde_json::to_string(feature)?;
        let priority = feature.feature.priority.queue_rank();
        let run_at = run_at.timestamp_millis();
        let now = Utc::now().timestamp_millis();
        let max_attempts = i64::from(max_attempts.max(1));

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT status FROM jobs WHERE id = ?1",
                        rusqlite::params![id],
                        |r| r.get(0),
                    )
                    .optional()?;
                let seq: i64 =
                    tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs", [], |r| r.get(0))?;

                let outcome = match existing.as_deref() {
                    Some("waiting") | Some("active") => EnqueueOutcome::Duplicate,
                    Some(_) => {
                        tx.execute(
                            "UPDATE jobs SET payload = ?2, priority = ?3, status = 'waiting',
                                attempts = 0, max_attempts = ?4, run_at = ?5, seq = ?6,
                                created_at = ?7, finished_at = NULL, result = NULL,
                                last_error = NULL
                             WHERE id = ?1",
                            rusqlite::params![id, payload, priority, max_attempts, run_at, seq, now],
                        )?;
                        EnqueueOutcome::Created
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO jobs (id, payload, priority, status, attempts,
                                max_attempts, run_at, seq, created_at)
                             VALUES (?1, ?2, ?3, 'waiting', 0, ?4, ?5, ?6, ?7)",
                            rusqlite::params![id, payload, priority, max_attempts, run_at, seq, now],
                        )?;
                        EnqueueOutcome::Created
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }

    /// Atomically move the best ready job to `active` and return it.
    /// Ready means waiting with `run_at <= now`; ordering is priority then
    /// insertion order.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now = now.timestamp_millis();
        let raw = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let raw = tx
                    .query_row(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs
                             WHERE status = 'waiting' AND run_at <= ?1
                             ORDER BY priority ASC, seq ASC
                             LIMIT 1"
                        ),
                        rusqlite::params![now],
                        row_to_raw,
                    )
                    .optional()?;
                let Some(mut raw) = raw else {
                    return Ok(None);
                };
                tx.execute(
                    "UPDATE jobs SET status = 'active', attempts = attempts + 1 WHERE id = ?1",
                    rusqlite::params![raw.id],
                )?;
                tx.commit()?;
                raw.status = "active".into();
                raw.attempts += 1;
                Ok(Some(raw))
            })
            .await?;
        raw.map(RawJob::into_job).transpose()
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    pub async fn complete(&self, id: &str, result: &serde_json::Value) -> Result<()> {
        let id = id.to_string();
        let result = serde_json::to_string(result)?;
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'completed', finished_at = ?2, result = ?3,
                        last_error = NULL
                     WHERE id = ?1",
                    rusqlite::params![id, now, result],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record a failed attempt. With `retry_at` the job goes back to waiting
    /// until that time; without it the job is failed for good.
    pub async fn fail(&self, id: &str, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        let now = Utc::now().timestamp_millis();
        let retry_at = retry_at.map(|t| t.timestamp_millis());
        self.conn
            .call(move |conn| {
                match retry_at {
                    Some(at) => conn.execute(
                        "UPDATE jobs SET status = 'waiting', run_at = ?2, last_error = ?3
                         WHERE id = ?1",
                        rusqlite::params![id, at, error],
                    )?,
                    None => conn.execute(
                        "UPDATE jobs SET status = 'failed', finished_at = ?2, last_error = ?3
                         WHERE id = ?1",
                        rusqlite::params![id, now, error],
                    )?,
                };
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Put every job left `active` back to `waiting`. The interrupted attempt
    /// is not counted. Returns the number of recovered jobs.
    pub async fn recover_active(&self) -> Result<u64> {
        let n = self
            .conn
            .call(|conn| {
                let n = conn.execute(
                    "UPDATE jobs SET status = 'waiting', attempts = MAX(attempts - 1, 0)
                     WHERE status = 'active'",
                    [],
                )?;
                Ok(n as u64)
            })
            .await?;
        Ok(n)
    }

    /// Remove every waiting and delayed job. Active and finished jobs stay.
    pub async fn drain(&self) -> Result<u64> {
        let n = self
            .conn
            .call(|conn| {
                let n = conn.execute("DELETE FROM jobs WHERE status = 'waiting'", [])?;
                Ok(n as u64)
            })
            .await?;
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let id = id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                        rusqlite::params![id],
                        row_to_raw,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;
        raw.map(RawJob::into_job).transpose()
    }

    pub async fn counts(&self, now: DateTime<Utc>) -> Result<QueueCounts> {
        let now = now.timestamp_millis();
        let counts = self
            .conn
            .call(move |conn| {
                let mut counts = QueueCounts::default();
                let mut stmt = conn.prepare(
                    "SELECT status, run_at > ?1 AS delayed, COUNT(*) FROM jobs
                     GROUP BY status, delayed",
                )?;
                let mut rows = stmt.query(rusqlite::params![now])?;
                while let Some(row) = rows.next()? {
                    let status: String = row.get(0)?;
                    let delayed: bool = row.get(1)?;
                    let n = row.get::<_, i64>(2)?.max(0) as u64;
                    match status.as_str() {
                        "waiting" if delayed => counts.delayed += n,
                        "waiting" => counts.waiting += n,
                        "active" => counts.active += n,
                        "completed" => counts.completed += n,
                        "failed" => counts.failed += n,
                        _ => {}
                    }
                }
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    /// Earliest run time among waiting jobs, if any.
    pub async fn next_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = self
            .conn
            .call(|conn| {
                let ms = conn.query_row(
                    "SELECT MIN(run_at) FROM jobs WHERE status = 'waiting'",
                    [],
                    |r| r.get(0),
                )?;
                Ok(ms)
            })
            .await?;
        ms.map(millis_to_utc).transpose()
    }

    /// Apply retention to finished jobs. Returns the number removed.
    pub async fn prune_finished(&self, now: DateTime<Utc>, retention: Retention) -> Result<u64> {
        let completed_cutoff = (now - retention.completed_age).timestamp_millis();
        let failed_cutoff = (now - retention.failed_age).timestamp_millis();
        let keep = i64::from(retention.completed_keep);
        let n = self
            .conn
            .call(move |conn| {
                let mut n = conn.execute(
                    "DELETE FROM jobs WHERE status = 'completed' AND finished_at < ?1",
                    rusqlite::params![completed_cutoff],
                )?;
                n += conn.execute(
                    "DELETE FROM jobs WHERE status = 'completed' AND id NOT IN (
                        SELECT id FROM jobs WHERE status = 'completed'
                        ORDER BY finished_at DESC LIMIT ?1
                     )",
                    rusqlite::params![keep],
                )?;
                n += conn.execute(
                    "DELETE FROM jobs WHERE status = 'failed' AND finished_at < ?1",
                    rusqlite::params![failed_cutoff],
                )?;
                Ok(n as u64)
            })
            .await?;
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Pause flag
    // -----------------------------------------------------------------------

    pub async fn is_paused(&self) -> Result<bool> {
        let paused = self
            .conn
            .call(|conn| {
                let value: Option<String> = conn
                    .query_row("SELECT value FROM queue_state WHERE key = 'paused'", [], |r| {
                        r.get(0)
                    })
                    .optional()?;
                Ok(value.as_deref() == Some("1"))
            })
            .await?;
        Ok(paused)
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        let value = if paused { "1" } else { "0" };
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO queue_state (key, value) VALUES ('paused', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    rusqlite::params![value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
