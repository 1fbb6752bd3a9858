//! Session error taxonomy.

use super::state::SessionState;
use crate::permissions::Permission;
use crate::storage::PipelineError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The host has not granted a required permission.
    #[error("{0} permission not granted")]
    PermissionDenied(Permission),
    /// No device could be opened.
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    /// `open` was called while a handle is held.
    #[error("a camera handle is already open")]
    AlreadyOpen,
    /// A capture session could not be configured.
    #[error("capture session configuration failed: {0}")]
    ConfigurationFailed(String),
    /// Another capture holds the device.
    #[error("a capture is already in flight")]
    Busy,
    /// The image could not be saved.
    #[error("failed to persist image to {}: {source}", path.display())]
    PersistenceFailed {
        /// Destination that was being written.
        path: PathBuf,
        /// Underlying pipeline failure.
        #[source]
        source: PipelineError,
    },
    /// The handle is stale or the device went away.
    #[error("camera hardware disconnected")]
    HardwareDisconnected,
    /// The hardware did not produce an image.
    #[error("still capture failed: {0}")]
    CaptureFailed(String),
    /// The operation is not allowed in the current state.
    #[error("operation requires state {required:?}, session is {actual:?}")]
    InvalidState {
        /// State the operation needs.
        required: SessionState,
        /// State the session was in.
        actual: SessionState,
    },
    /// The state machine refused a transition.
    #[error("illegal session transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },
}

impl CameraError {
    /// Failures that are often gone on the next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::DeviceUnavailable(_) | CameraError::ConfigurationFailed(_)
        )
    }

    /// Failures that end the current handle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CameraError::HardwareDisconnected | CameraError::PermissionDenied(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied(_) => "permission_denied",
            CameraError::DeviceUnavailable(_) => "device_unavailable",
            CameraError::AlreadyOpen => "already_open",
            CameraError::ConfigurationFailed(_) => "configuration_failed",
            CameraError::Busy => "busy",
            CameraError::PersistenceFailed { .. } => "persistence_failed",
            CameraError::HardwareDisconnected => "hardware_disconnected",
            CameraError::CaptureFailed(_) => "capture_failed",
            CameraError::InvalidState { .. } => "invalid_state",
            CameraError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
