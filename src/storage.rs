use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

pub const PREDICTIONS_KEY: &str = "pl-predictor-v8";
pub const THEME_KEY: &str = "pl-predictor-theme-v8";
pub const BADGE_CACHE_KEY: &str = "pl-predictor-badges-v8";
pub const DEBUG_LOG_KEY: &str = "pl-predictor-debug-v8";
pub const DEBUG_ENABLED_KEY: &str = "pl-predictor-debug-enabled-v8";

const DB_FILE: &str = "storage.sqlite";

/// Synchronous string key-value store, the native stand-in for browser local storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite store {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("read key {key}"))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("write key {key}"))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable, keeping data for this session only: {0}")]
    Degraded(String),
}

struct StorageInner {
    backend: Option<Box<dyn KeyValueStore>>,
    session: HashMap<String, String>,
    degraded: Option<String>,
}

/// Shared persisted state. A failing backend is dropped on first error and
/// the store keeps working from its in-memory session copy.
pub struct Storage {
    inner: Mutex<StorageInner>,
}

impl Storage {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self {
            inner: Mutex::new(StorageInner {
                backend: Some(backend),
                session: HashMap::new(),
                degraded: None,
            }),
        }
    }

    pub fn session_only(reason: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(StorageInner {
                backend: None,
                session: HashMap::new(),
                degraded: Some(reason.into()),
            }),
        }
    }

    /// Opens the SQLite store under `dir`, or a session-only store if that fails.
    pub fn open_default(dir: Option<&Path>) -> Self {
        let Some(path) = dir.map(|d| d.join(DB_FILE)) else {
            return Self::session_only("no data directory");
        };
        match SqliteStore::open(&path) {
            Ok(store) => Self::new(Box::new(store)),
            Err(err) => Self::session_only(format!("{err:#}")),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        if let Some(value) = inner.session.get(key) {
            return Some(value.clone());
        }
        let result = match inner.backend.as_ref() {
            Some(backend) => backend.get(key),
            None => return None,
        };
        match result {
            Ok(value) => {
                if let Some(value) = value.as_ref() {
                    inner.session.insert(key.to_string(), value.clone());
                }
                value
            }
            Err(err) => {
                inner.degrade(&err);
                None
            }
        }
    }

    /// Writes `value`. The session copy is always updated; an error means the
    /// backend just failed and later writes stay in memory.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.session.insert(key.to_string(), value.to_string());
        let result = match inner.backend.as_mut() {
            Some(backend) => backend.set(key, value),
            None => return Ok(()),
        };
        result.map_err(|err| StorageError::Degraded(inner.degrade(&err)))
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.lock().degraded.clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.lock().backend.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, StorageInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageInner {
    fn degrade(&mut self, err: &anyhow::Error) -> String {
        let reason = format!("{err:#}");
        self.backend = None;
        self.degraded = Some(reason.clone());
        reason
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    const APP_DIR: &str = "pl_predictor";
    if let Ok(base) = std::env::var("XDG_DATA_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(APP_DIR));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that fails every call, like a browser with storage disabled.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("storage disabled"))
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("quota exceeded"))
        }
    }

    #[test]
    fn sqlite_store_round_trips_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.sqlite");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.set("a", "1").unwrap();
            store.set("a", "2").unwrap();
            store.set("b", "x").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("b").unwrap().as_deref(), Some("x"));
        assert_eq!(store.get("c").unwrap(), None);
    }

    #[test]
    fn failing_backend_degrades_to_session_memory() {
        let storage = Storage::new(Box::new(BrokenStore));
        assert!(storage.is_persistent());

        let err = storage.set("k", "v").unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!storage.is_persistent());
        assert_eq!(storage.get("k").as_deref(), Some("v"));

        storage.set("k", "w").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("w"));
        assert!(storage.degraded_reason().is_some());
    }

    #[test]
    fn failing_read_degrades_without_panicking() {
        let storage = Storage::new(Box::new(BrokenStore));
        assert_eq!(storage.get("missing"), None);
        assert!(!storage.is_persistent());
    }

    #[test]
    fn open_default_without_dir_is_session_only() {
        let storage = Storage::open_default(None);
        assert!(!storage.is_persistent());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("v"));
    }
}
