//! Long-term memory of past features, agent checkpoints and session state.
//!
//! [`PatternStore`] is the seam the pipeline talks to. The shipped
//! [`SqlitePatternStore`] ranks past features by token overlap (Jaccard over
//! lowercased words), which is enough to surface "we built something like
//! this before" hints for the architect.

use std::path::Path;

use ahash::AHashSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::types::AgentRole;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PatternStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, PatternStoreError>;

/// A successful agent output kept for later reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub feature_id: String,
    pub role: AgentRole,
    pub task_id: String,
    pub content: String,
    /// Feature context stored alongside the output, e.g. title and complexity.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarFeature {
    pub id: String,
    pub title: String,
    pub score: f64,
    pub metadata: serde_json::Value,
}

/// Governor totals persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub monthly_spend: f64,
    pub feature_count: u64,
    pub last_feature_at: Option<DateTime<Utc>>,
    /// Billing month as `YYYY-MM`.
    pub billing_period: String,
}

impl SessionState {
    pub fn billing_period_of(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Up to `k` past features most similar to `query`, best first.
    async fn find_similar(&self, query: &str, k: usize) -> Result<Vec<SimilarFeature>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<String>;

    async fn record_feature(
        &self,
        id: &str,
        title: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    async fn load_session(&self, id: &str) -> Result<Option<SessionState>>;

    async fn save_session(&self, id: &str, state: &SessionState) -> Result<()>;

    /// Delete checkpoints created before `older_than`. Returns how many.
    async fn prune_checkpoints(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

fn tokens(text: &str) -> AHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the two texts' word sets, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

// ---------------------------------------------------------------------------
// SqlitePatternStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqlitePatternStore {
    conn: Connection,
}

impl SqlitePatternStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PatternStoreError::Io(e.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

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
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS features (
                        id          TEXT PRIMARY KEY,
                        title       TEXT NOT NULL,
                        search_text TEXT NOT NULL,
                        metadata    TEXT NOT NULL,
                        recorded_at INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS checkpoints (
                        id         TEXT PRIMARY KEY,
                        feature_id TEXT NOT NULL,
                        role       TEXT NOT NULL,
                        task_id    TEXT NOT NULL,
                        content    TEXT NOT NULL,
                        metadata   TEXT NOT NULL DEFAULT '{}',
                        created_at INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_checkpoints_feature
                        ON checkpoints(feature_id);

                    CREATE INDEX IF NOT EXISTS idx_checkpoints_created
                        ON checkpoints(created_at);

                    CREATE TABLE IF NOT EXISTS sessions (
                        id    TEXT PRIMARY KEY,
                        state TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn checkpoint_count(&self) -> Result<u64> {
        let n = self
            .conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |r| r.get(0))?;
                Ok(n.max(0) as u64)
            })
            .await?;
        Ok(n)
    }
}

impl SqlitePatternStore {
    /// Every checkpoint kept for `feature_id`, oldest first.
    pub async fn checkpoints_for(&self, feature_id: &str) -> Result<Vec<Checkpoint>> {
        let feature_id = feature_id.to_string();
        let rows: Vec<(String, String, String, String, String, i64)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT feature_id, role, task_id, content, metadata, created_at
                     FROM checkpoints WHERE feature_id = ?1 ORDER BY created_at, rowid",
                )?;
                let rows = stmt
                    .query_map([feature_id], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(feature_id, role, task_id, content, metadata, created_at)| {
                Ok(Checkpoint {
                    feature_id,
                    role: serde_json::from_value(serde_json::Value::String(role))?,
                    task_id,
                    content,
                    metadata: serde_json::from_str(&metadata)?,
                    created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl PatternStore for SqlitePatternStore {
    async fn find_similar(&self, query: &str, k: usize) -> Result<Vec<SimilarFeature>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<(String, String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, title, search_text, metadata FROM features")?;
                let rows: Vec<(String, String, String, String)> = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut scored = Vec::new();
        for (id, title, text, metadata) in rows {
            let score = similarity(query, &text);
            if score > 0.0 {
                scored.push(SimilarFeature {
                    id,
                    title,
                    score,
                    metadata: serde_json::from_str(&metadata)?,
                });
            }
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        let feature_id = checkpoint.feature_id.clone();
        let role = checkpoint.role.as_str();
        let task_id = checkpoint.task_id.clone();
        let content = checkpoint.content.clone();
        let metadata = serde_json::to_string(&checkpoint.metadata)?;
        let created_at = checkpoint.created_at.timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints
                        (id, feature_id, role, task_id, content, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![row_id, feature_id, role, task_id, content, metadata, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    async fn record_feature(
        &self,
        id: &str,
        title: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let description = metadata
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let search_text = format!("{title} {description}");
        let id = id.to_string();
        let title = title.to_string();
        let metadata = serde_json::to_string(metadata)?;
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO features (id, title, search_text, metadata, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title, search_text = excluded.search_text,
                        metadata = excluded.metadata, recorded_at = excluded.recorded_at",
                    rusqlite::params![id, title, search_text, metadata, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionState>> {
        let id = id.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let state = conn
                    .query_row(
                        "SELECT state FROM sessions WHERE id = ?1",
                        rusqlite::params![id],
                        |r| r.get(0),
                    )
                    .optional()?;
                Ok(state)
            })
            .await?;
        Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
    }

    async fn save_session(&self, id: &str, state: &SessionState) -> Result<()> {
        let id = id.to_string();
        let state = serde_json::to_string(state)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, state) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET state = excluded.state",
                    rusqlite::params![id, state],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn prune_checkpoints(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let cutoff = older_than.timestamp_millis();
        let n = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM checkpoints WHERE created_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(n as u64)
            })
            .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("user login form", "user login form"), 1.0);
        let s = similarity("user login form", "login page for admins");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn short_words_ignored() {
        assert_eq!(similarity("a to of", "a to of"), 0.0);
    }

    #[test]
    fn billing_period_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(SessionState::billing_period_of(at), "2026-03");
    }
}
