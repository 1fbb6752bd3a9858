//! Camera hardware abstraction.
//!
//! This module provides the backend trait the session layer drives, the
//! hardware event model, preview stream negotiation, and the single-slot
//! buffer reader used for still captures. The camera itself is treated as
//! an asynchronous collaborator: requests go in synchronously, results come
//! back as events.

mod backend;
mod buffer;
mod mock;
#[cfg(feature = "camera")]
mod native;
mod stream;

pub use backend::{
    CameraBackend, CaptureRequest, ControlMode, EventSink, HardwareError, HardwareEvent,
    OutputTarget, PreviewSurface, RequestTemplate, SessionId, SurfaceId, TargetId,
};
pub use buffer::{
    BufferFormat, BufferReader, BufferStats, DeliveryError, ImageBuffer, ReaderId, ReaderSurface,
};
pub use mock::{MockBackend, MockDevice, MockLog};
#[cfg(feature = "camera")]
pub use native::NativeBackend;
pub use stream::{AspectRatio, Resolution, StreamConfig};
