//! Persistent key-value settings.
//!
//! Holds the first-run marker and the image sequence counter. Hosts inject
//! their own store; [`TomlSettingsStore`] keeps the values in a TOML file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Set on first run.
pub const FIRST_START_KEY: &str = "FirstStart";
/// Next image sequence number.
pub const FILE_NAME_KEY: &str = "FileName";
/// Sequence number used when the counter has never been written.
pub const DEFAULT_SEQUENCE: u32 = 1;

/// Errors from a settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file is malformed.
    #[error("failed to parse settings file: {0}")]
    Parse(String),
    /// The table could not be encoded.
    #[error("failed to serialize settings: {0}")]
    Serialize(String),
    /// A stored value has the wrong type.
    #[error("invalid value {value:?} for setting {key}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Raw stored text.
        value: String,
    },
}

/// External key-value collaborator.
pub trait SettingsStore: Send + Sync {
    /// Reads a value, `None` when unset.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value durably.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns true if the key has been written.
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Writes first-run defaults. Returns true if this was the first run.
pub fn initialize_first_run(store: &dyn SettingsStore) -> Result<bool, StoreError> {
    if store.contains(FIRST_START_KEY)? {
        return Ok(false);
    }
    store.set(FIRST_START_KEY, "true")?;
    store.set(FILE_NAME_KEY, &DEFAULT_SEQUENCE.to_string())?;
    tracing::info!(sequence = DEFAULT_SEQUENCE, "First run, settings initialized");
    Ok(true)
}

/// Current image sequence number.
pub fn read_sequence(store: &dyn SettingsStore) -> Result<u32, StoreError> {
    match store.get(FILE_NAME_KEY)? {
        None => Ok(DEFAULT_SEQUENCE),
        Some(value) => value.trim().parse().map_err(|_| StoreError::InvalidValue {
            key: FILE_NAME_KEY.to_string(),
            value,
        }),
    }
}

/// Stores the image sequence number.
pub fn write_sequence(store: &dyn SettingsStore, sequence: u32) -> Result<(), StoreError> {
    store.set(FILE_NAME_KEY, &sequence.to_string())
}

fn lock(values: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    values.lock().unwrap_or_else(|e| e.into_inner())
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a flat TOML table.
#[derive(Debug)]
pub struct TomlSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlSettingsStore {
    /// Opens the file at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        let previous = values.insert(key.to_string(), value.to_string());

        let written = toml::to_string(&*values)
            .map_err(|e| StoreError::Serialize(e.to_string()))
            .and_then(|content| {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.path, content).map_err(StoreError::from)
            });

        if written.is_err() {
            // Keep memory consistent with disk
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
        }
        written
    }
}
