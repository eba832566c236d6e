use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

pub(crate) const HISTORY_KEY: &str = "completionHistory";
pub(crate) const HISTORY_CAPACITY: usize = 10;
pub(crate) const HISTORY_DISPLAY_LIMIT: usize = 5;
const FALLBACK_KEEP: usize = 3;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("storage quota exceeded ({size} > {quota} bytes)")]
    QuotaExceeded { size: usize, quota: usize },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable string-to-string storage with a per-value size limit.
pub(crate) trait KeyValueStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

pub(crate) struct SqliteStorage {
    conn: Connection,
    quota_bytes: usize,
}

impl SqliteStorage {
    pub(crate) fn open(path: &Path, quota_bytes: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create storage dir {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("open storage db {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::with_connection(conn, quota_bytes)
    }

    /// Session-only storage, used when the data directory is unusable.
    pub(crate) fn in_memory(quota_bytes: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory storage")?;
        Self::with_connection(conn, quota_bytes)
    }

    fn with_connection(conn: Connection, quota_bytes: usize) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );
            ",
        )
        .context("init storage schema")?;

        Ok(Self { conn, quota_bytes })
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let size = key.len() + value.len();
        if size > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                size,
                quota: self.quota_bytes,
            });
        }
        self.conn.execute(
            "INSERT INTO kv(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = unixepoch()",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Recent completions, newest first, never longer than [`HISTORY_CAPACITY`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CompletionHistory(Vec<String>);

impl CompletionHistory {
    pub(crate) fn from_entries(mut entries: Vec<String>) -> Self {
        entries.truncate(HISTORY_CAPACITY);
        Self(entries)
    }

    pub(crate) fn entries(&self) -> &[String] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The slice shown to the user.
    pub(crate) fn recent(&self) -> &[String] {
        &self.0[..self.0.len().min(HISTORY_DISPLAY_LIMIT)]
    }

    /// Returns a new history with `item` in front. Storage is untouched.
    pub(crate) fn record(&self, item: impl Into<String>) -> Self {
        let mut entries = Vec::with_capacity(HISTORY_CAPACITY);
        entries.push(item.into());
        entries.extend(self.0.iter().take(HISTORY_CAPACITY - 1).cloned());
        Self(entries)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PersistOutcome {
    Saved,
    /// Only the newest `kept` entries made it to storage.
    Truncated { kept: usize },
    /// Nothing could be written; storage and memory were both emptied.
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Confirmation {
    Accepted,
    Declined,
}

pub(crate) struct CompletionStore {
    storage: Box<dyn KeyValueStorage>,
}

impl CompletionStore {
    pub(crate) fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub(crate) fn open(path: &Path, quota_bytes: usize) -> Result<Self> {
        Ok(Self::new(Box::new(SqliteStorage::open(path, quota_bytes)?)))
    }

    pub(crate) fn in_memory(quota_bytes: usize) -> Result<Self> {
        Ok(Self::new(Box::new(SqliteStorage::in_memory(quota_bytes)?)))
    }

    pub(crate) fn load(&self) -> CompletionHistory {
        let raw = match self.storage.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CompletionHistory::default(),
            Err(err) => {
                warn!("history read failed: {err}");
                return CompletionHistory::default();
            }
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => {
                let entries = items
                    .into_iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                CompletionHistory::from_entries(entries)
            }
            Ok(_) => {
                warn!("persisted history is not a list; starting empty");
                CompletionHistory::default()
            }
            Err(err) => {
                warn!("persisted history is corrupt ({err}); starting empty");
                CompletionHistory::default()
            }
        }
    }

    /// Full write, then the newest few, then give up and wipe.
    pub(crate) fn persist(&mut self, history: &mut CompletionHistory) -> PersistOutcome {
        match self.write(history.entries()) {
            Ok(()) => return PersistOutcome::Saved,
            Err(err) => warn!("history write failed: {err}"),
        }

        let kept = history.len().min(FALLBACK_KEEP);
        match self.write(&history.entries()[..kept]) {
            Ok(()) => {
                info!(kept, "history persisted in truncated form");
                return PersistOutcome::Truncated { kept };
            }
            Err(err) => warn!("truncated history write failed: {err}"),
        }

        if let Err(err) = self.storage.remove(HISTORY_KEY) {
            warn!("history reset could not remove key: {err}");
        }
        *history = CompletionHistory::default();
        PersistOutcome::Reset
    }

    /// Empties storage and memory, but only once the user has agreed.
    pub(crate) fn clear(
        &mut self,
        history: &mut CompletionHistory,
        confirmation: Confirmation,
    ) -> bool {
        if confirmation == Confirmation::Declined {
            return false;
        }
        if let Err(err) = self.storage.remove(HISTORY_KEY) {
            warn!("history clear could not remove key: {err}");
        }
        *history = CompletionHistory::default();
        info!("history cleared");
        true
    }

    fn write(&mut self, entries: &[String]) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(entries)?;
        self.storage.set(HISTORY_KEY, &encoded)
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> Option<String> {
        self.storage.get(HISTORY_KEY).ok().flatten()
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut dyn KeyValueStorage {
        self.storage.as_mut()
    }
}
