//! Camera hardware abstraction.
//!
//! A [`CameraBackend`] issues requests synchronously and reports their
//! completion asynchronously as [`HardwareEvent`]s posted to an [`EventSink`].
//! The session owner is the single consumer of those events, which keeps
//! every state transition for a device serialized.

use super::buffer::{ReaderId, ReaderSurface};
use super::stream::Resolution;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported synchronously by the hardware layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    /// No device has this identifier.
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    /// Another client holds the device.
    #[error("camera device is busy")]
    Busy,
    /// The device is gone or was never opened.
    #[error("camera device disconnected")]
    Disconnected,
    /// The session was closed or replaced.
    #[error("unknown capture session {0:?}")]
    UnknownSession(SessionId),
    /// The platform camera API failed.
    #[error("camera access failed: {0}")]
    Access(String),
}

/// Identifies a configured capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Identifies a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Display surface the preview stream renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSurface {
    id: SurfaceId,
    buffer_size: Option<Resolution>,
}

impl PreviewSurface {
    /// Wraps a surface owned by the presentation layer.
    pub fn new(id: SurfaceId) -> Self {
        Self {
            id,
            buffer_size: None,
        }
    }

    /// Surface identifier.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Default buffer size, set once a stream has been negotiated.
    pub fn buffer_size(&self) -> Option<Resolution> {
        self.buffer_size
    }

    /// Binds the negotiated stream resolution to the surface.
    pub fn set_buffer_size(&mut self, size: Resolution) {
        self.buffer_size = Some(size);
    }
}

/// An output a capture session may write into.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Continuous preview rendering.
    Preview(PreviewSurface),
    /// Single-slot still image reader.
    Reader(ReaderSurface),
}

impl OutputTarget {
    /// Identifier used by capture requests.
    pub fn target_id(&self) -> TargetId {
        match self {
            OutputTarget::Preview(surface) => TargetId::Surface(surface.id()),
            OutputTarget::Reader(reader) => TargetId::Reader(reader.id()),
        }
    }
}

/// Reference to a configured output inside a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetId {
    /// A preview surface.
    Surface(SurfaceId),
    /// A still image reader.
    Reader(ReaderId),
}

/// Request template, mirrors the intent of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Continuous preview frames.
    Preview,
    /// One high-quality still.
    StillCapture,
}

/// 3A control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Hardware defaults for the template.
    Off,
    /// Auto exposure and auto focus.
    Auto,
}

/// A capture request issued against a configured session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// What the request is for.
    pub template: RequestTemplate,
    /// Outputs the frame is written to.
    pub targets: Vec<TargetId>,
    /// 3A behaviour.
    pub control_mode: ControlMode,
}

impl CaptureRequest {
    /// Repeating request rendering into the preview surface only.
    pub fn preview(surface: SurfaceId) -> Self {
        Self {
            template: RequestTemplate::Preview,
            targets: vec![TargetId::Surface(surface)],
            control_mode: ControlMode::Off,
        }
    }

    /// One-shot still capture into the reader, keeping preview rendering.
    pub fn still(reader: ReaderId, surface: SurfaceId) -> Self {
        Self {
            template: RequestTemplate::StillCapture,
            targets: vec![TargetId::Reader(reader), TargetId::Surface(surface)],
            control_mode: ControlMode::Auto,
        }
    }
}

/// Asynchronous hardware notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    /// Exclusive ownership of the device was granted.
    Opened {
        /// Device that was opened.
        device_id: String,
    },
    /// The device went away.
    Disconnected {
        /// Device that went away.
        device_id: String,
    },
    /// The device reported a fatal error.
    DeviceError {
        /// Failing device.
        device_id: String,
        /// Platform error code.
        code: i32,
    },
    /// A session finished configuring its outputs.
    SessionConfigured {
        /// Configured session.
        session: SessionId,
    },
    /// A session could not be configured.
    SessionConfigureFailed {
        /// Rejected session.
        session: SessionId,
    },
    /// A session was closed, explicitly or by being replaced.
    SessionClosed {
        /// Closed session.
        session: SessionId,
    },
    /// A reader has an image ready to acquire.
    ImageAvailable {
        /// Reader holding the image.
        reader: ReaderId,
    },
    /// A one-shot request could not be completed.
    CaptureFailed {
        /// Session the request was issued on.
        session: SessionId,
        /// Hardware description of the failure.
        reason: String,
    },
}

impl HardwareEvent {
    /// Device a device-level event refers to.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            HardwareEvent::Opened { device_id }
            | HardwareEvent::Disconnected { device_id }
            | HardwareEvent::DeviceError { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// Returns true for events that invalidate the device.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HardwareEvent::Disconnected { .. } | HardwareEvent::DeviceError { .. }
        )
    }
}

/// Sending half of the hardware event queue.
///
/// Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<HardwareEvent>,
}

impl EventSink {
    /// Creates a new event queue.
    pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<HardwareEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    /// Posts an event. Events sent after the owner is gone are dropped.
    pub fn post(&self, event: HardwareEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Hardware event dropped, session owner is gone");
        }
    }
}

/// Trait for camera hardware implementations.
///
/// This abstraction allows swapping between real camera hardware
/// and mock implementations for testing. Methods return as soon as the
/// request is issued; outcomes arrive on the [`EventSink`] passed to
/// [`CameraBackend::open_device`].
pub trait CameraBackend: Send + Sync {
    /// Lists available devices in enumeration order.
    fn device_ids(&self) -> Result<Vec<String>, HardwareError>;

    /// Output resolutions the device advertises for preview surfaces.
    fn output_sizes(&self, device_id: &str) -> Result<Vec<Resolution>, HardwareError>;

    /// Requests exclusive ownership. Completion is `Opened`, `Disconnected`
    /// or `DeviceError`.
    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), HardwareError>;

    /// Releases the device. Safe to call on an already closed device.
    fn close_device(&self, device_id: &str);

    /// Creates a session for the given outputs, replacing any active one.
    /// Completion is `SessionConfigured` or `SessionConfigureFailed`.
    fn create_session(&self, targets: Vec<OutputTarget>) -> Result<SessionId, HardwareError>;

    /// Starts a request that repeats until replaced or the session closes.
    fn set_repeating_request(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<(), HardwareError>;

    /// Issues a single request. Completion is `ImageAvailable` for each
    /// reader target, or `CaptureFailed`.
    fn capture(&self, session: SessionId, request: &CaptureRequest) -> Result<(), HardwareError>;

    /// Closes a session. Completion is `SessionClosed`.
    fn close_session(&self, session: SessionId);
}
