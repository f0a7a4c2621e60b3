use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Local;

use crate::storage::{DEBUG_ENABLED_KEY, DEBUG_LOG_KEY, Storage, StorageError};

pub const MAX_DEBUG_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Bounded log shown in the debug overlay. Persisted after every change so a
/// crash or restart still shows what the last export attempted.
pub struct DebugLog {
    entries: VecDeque<String>,
    enabled: bool,
    storage: Option<Arc<Storage>>,
}

impl DebugLog {
    pub fn load(storage: Arc<Storage>) -> Self {
        let entries: VecDeque<String> = storage
            .get(DEBUG_LOG_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .unwrap_or_default()
            .into_iter()
            .collect();
        let enabled = storage.get(DEBUG_ENABLED_KEY).as_deref() == Some("true");
        let mut log = Self {
            entries,
            enabled,
            storage: Some(storage),
        };
        log.truncate();
        log
    }

    /// A log that lives only in memory.
    pub fn detached() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_DEBUG_ENTRIES),
            enabled: false,
            storage: None,
        }
    }

    pub fn push(&mut self, level: Level, msg: impl AsRef<str>) {
        self.append(level, msg.as_ref());
        self.persist();
    }

    pub fn info(&mut self, msg: impl AsRef<str>) {
        self.push(Level::Info, msg);
    }

    pub fn success(&mut self, msg: impl AsRef<str>) {
        self.push(Level::Success, msg);
    }

    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.push(Level::Warn, msg);
    }

    pub fn error(&mut self, msg: impl AsRef<str>) {
        self.push(Level::Error, msg);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(err) = storage.set(DEBUG_ENABLED_KEY, if enabled { "true" } else { "false" }) {
            self.warn(format!("Could not persist debug setting: {err}"));
        }
    }

    fn append(&mut self, level: Level, msg: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        self.entries
            .push_back(format!("[{stamp}] {}: {msg}", level.label()));
        self.truncate();
    }

    fn truncate(&mut self) {
        while self.entries.len() > MAX_DEBUG_ENTRIES {
            self.entries.pop_front();
        }
    }

    fn save_entries(&self) -> Result<(), StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        match serde_json::to_string(&self.entries) {
            Ok(json) => storage.set(DEBUG_LOG_KEY, &json),
            Err(_) => Ok(()),
        }
    }

    /// Saves the buffer. A failed write is recorded in the buffer itself and
    /// saved again, which lands in the session copy once the backend is gone.
    fn persist(&mut self) {
        if let Err(err) = self.save_entries() {
            self.append(Level::Warn, &format!("Could not persist debug log: {err}"));
            if let Err(err) = self.save_entries() {
                self.append(Level::Error, &err.to_string());
            }
        }
    }
}
