//! Durable transcript hand-off
//!
//! A single-row-per-key SQLite table. The feedback view reads the value stored
//! under [`TRANSCRIPT_KEY`] after the session navigates away.

use crate::error::SessionError;
use crate::runtime::TranscriptStore;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Key the feedback view reads
pub const TRANSCRIPT_KEY: &str = "conversation_transcript";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored transcript is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::persistence(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe key-value store handle
#[derive(Clone)]
pub struct SqliteTranscriptStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTranscriptStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn write_transcript(&self, entries: &[TranscriptEntry]) -> StoreResult<()> {
        let json = serde_json::to_string(entries)?;
        self.put(TRANSCRIPT_KEY, &json)
    }

    pub fn read_transcript(&self) -> StoreResult<Option<Vec<TranscriptEntry>>> {
        self.get(TRANSCRIPT_KEY)?
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn save(&self, entries: &[TranscriptEntry]) -> Result<(), SessionError> {
        self.write_transcript(entries)?;
        tracing::debug!(entries = entries.len(), key = TRANSCRIPT_KEY, "Transcript written");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<TranscriptEntry>>, SessionError> {
        Ok(self.read_transcript()?)
    }
}
