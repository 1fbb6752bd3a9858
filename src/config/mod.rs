//! Configuration and persisted settings.
//!
//! `FileConfig` is the static TOML configuration. `SettingsStore` is the
//! mutable key-value state the host persists between runs.

mod settings;
mod store;

pub use settings::{
    CameraConfig, CaptureConfig, ConfigError, FileConfig, MetricsConfig, PreviewConfig,
    RetryConfig, StorageConfig,
};
pub use store::{
    initialize_first_run, read_sequence, write_sequence, MemorySettingsStore, SettingsStore,
    StoreError, TomlSettingsStore, DEFAULT_SEQUENCE, FILE_NAME_KEY, FIRST_START_KEY,
};
