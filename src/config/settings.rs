//! Application configuration.
//!
//! Callback waits are always bounded. A camera stack that never answers a
//! session configuration must surface as an error, not a hang.

use crate::device::AspectRatio;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform data/config roots.
const APP_DIR: &str = "smart-camera";

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A timeout is zero.
    #[error("timeouts must be non-zero")]
    InvalidTimeout,
    /// An aspect ratio component is zero.
    #[error("invalid aspect ratio (both components must be non-zero)")]
    InvalidAspectRatio,
    /// The default preview surface has a zero dimension.
    #[error("invalid preview surface size")]
    InvalidSurface,
    /// `max_attempts` is zero.
    #[error("retry policy needs at least one attempt")]
    InvalidRetry,
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Device acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Maximum wait for the device to report it is open.
    pub open_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: 2000,
        }
    }
}

/// Preview stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Aspect ratio the preview resolution must match.
    pub aspect: AspectRatio,
    /// Surface size used when the host does not report one.
    pub surface_width: u32,
    /// Height counterpart of `surface_width`.
    pub surface_height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            aspect: AspectRatio::default(),
            surface_width: 640,
            surface_height: 480,
        }
    }
}

/// Still capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum wait for a session configuration callback.
    pub configure_timeout_ms: u64,
    /// Maximum wait for the still image after the request is issued.
    pub image_timeout_ms: u64,
    /// Maximum wait for a session close acknowledgement.
    pub close_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            configure_timeout_ms: 2000,
            image_timeout_ms: 5000,
            close_timeout_ms: 500,
        }
    }
}

/// Bounded backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Where files live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// App-scoped media root; images go to `<media_root>/myImages`.
    pub media_root: Option<PathBuf>,
    /// Directory for transient capture artifacts.
    pub pictures_dir: Option<PathBuf>,
    /// Key-value settings file (sequence counter, first-run marker).
    pub settings_file: Option<PathBuf>,
}

impl StorageConfig {
    /// Media root, defaulting to the platform data directory.
    pub fn media_root(&self) -> PathBuf {
        self.media_root.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("media")
        })
    }

    /// Directory for transient capture artifacts.
    pub fn pictures_dir(&self) -> PathBuf {
        self.pictures_dir
            .clone()
            .or_else(|| dirs::picture_dir().map(|p| p.join(APP_DIR)))
            .unwrap_or_else(|| self.media_root().join("Pictures"))
    }

    /// Settings file, defaulting to the platform config directory.
    pub fn settings_file(&self) -> PathBuf {
        self.settings_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("settings.toml")
        })
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

impl MetricsConfig {
    /// Returns false when the exporter is switched off.
    pub fn enabled(&self) -> bool {
        self.port != 0
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Device open settings.
    #[serde(default)]
    pub camera: CameraConfig,
    /// Preview negotiation settings.
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Capture callback timeouts.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Where files are written.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.open_timeout_ms == 0
            || self.capture.configure_timeout_ms == 0
            || self.capture.image_timeout_ms == 0
            || self.capture.close_timeout_ms == 0
        {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.preview.aspect.width == 0 || self.preview.aspect.height == 0 {
            return Err(ConfigError::InvalidAspectRatio);
        }
        if self.preview.surface_width == 0 || self.preview.surface_height == 0 {
            return Err(ConfigError::InvalidSurface);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry);
        }
        Ok(())
    }
}
