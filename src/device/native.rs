//! Camera backend over `nokhwa`.
//!
//! The `nokhwa` camera is owned by a dedicated worker thread. Requests are
//! forwarded to it as commands, and its results come back as hardware
//! events, so the session layer sees the same callback model as with any
//! other backend.

use super::backend::{
    CameraBackend, CaptureRequest, EventSink, HardwareError, HardwareEvent, OutputTarget,
    SessionId, TargetId,
};
use super::buffer::ReaderSurface;
use super::stream::Resolution;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

enum Command {
    Configure { session: SessionId },
    Repeating { session: SessionId },
    Capture { session: SessionId, readers: Vec<ReaderSurface> },
    CloseSession { session: SessionId },
    Shutdown,
}

struct Worker {
    device_id: String,
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct NativeState {
    worker: Option<Worker>,
    next_session: u64,
    active: Option<(SessionId, Vec<OutputTarget>)>,
}

/// Backend for cameras reachable through the platform's native API.
#[derive(Default)]
pub struct NativeBackend {
    state: Mutex<NativeState>,
}

impl NativeBackend {
    /// Backend with no device open.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NativeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, command: Command) -> Result<(), HardwareError> {
        let state = self.state();
        let worker = state.worker.as_ref().ok_or(HardwareError::Disconnected)?;
        worker
            .commands
            .send(command)
            .map_err(|_| HardwareError::Disconnected)
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

fn access(e: nokhwa::NokhwaError) -> HardwareError {
    HardwareError::Access(e.to_string())
}

impl CameraBackend for NativeBackend {
    fn device_ids(&self) -> Result<Vec<String>, HardwareError> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(access)?;
        Ok(devices.iter().map(|info| info.index().as_string()).collect())
    }

    fn output_sizes(&self, device_id: &str) -> Result<Vec<Resolution>, HardwareError> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
        let mut camera = Camera::new(camera_index(device_id), requested).map_err(access)?;
        let formats = camera.compatible_camera_formats().map_err(access)?;

        let mut sizes: Vec<Resolution> = formats
            .iter()
            .map(|f| Resolution::new(f.resolution().width(), f.resolution().height()))
            .collect();
        sizes.sort_by_key(|r| std::cmp::Reverse(r.area()));
        sizes.dedup();
        Ok(sizes)
    }

    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), HardwareError> {
        let mut state = self.state();
        if state.worker.is_some() {
            return Err(HardwareError::Busy);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = device_id.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("camera-{device_id}"))
            .spawn(move || run_worker(id, events, rx))
            .map_err(|e| HardwareError::Access(e.to_string()))?;

        state.worker = Some(Worker {
            device_id: device_id.to_string(),
            commands: tx,
            thread,
        });
        Ok(())
    }

    fn close_device(&self, device_id: &str) {
        let worker = {
            let mut state = self.state();
            match &state.worker {
                Some(w) if w.device_id == device_id => {
                    state.active = None;
                    state.worker.take()
                }
                _ => None,
            }
        };
        if let Some(worker) = worker {
            let _ = worker.commands.send(Command::Shutdown);
            if worker.thread.join().is_err() {
                tracing::error!(device = device_id, "Camera worker panicked");
            }
            tracing::info!(device = device_id, "Native camera closed");
        }
    }

    fn create_session(&self, targets: Vec<OutputTarget>) -> Result<SessionId, HardwareError> {
        let session = {
            let mut state = self.state();
            if state.worker.is_none() {
                return Err(HardwareError::Disconnected);
            }
            state.next_session += 1;
            let session = SessionId(state.next_session);
            state.active = Some((session, targets));
            session
        };
        self.send(Command::Configure { session })?;
        Ok(session)
    }

    fn set_repeating_request(
        &self,
        session: SessionId,
        _request: &CaptureRequest,
    ) -> Result<(), HardwareError> {
        if !matches!(self.state().active, Some((active, _)) if active == session) {
            return Err(HardwareError::UnknownSession(session));
        }
        self.send(Command::Repeating { session })
    }

    fn capture(&self, session: SessionId, request: &CaptureRequest) -> Result<(), HardwareError> {
        let readers = {
            let state = self.state();
            match &state.active {
                Some((active, targets)) if *active == session => targets
                    .iter()
                    .filter_map(|t| match t {
                        OutputTarget::Reader(reader)
                            if request.targets.contains(&TargetId::Reader(reader.id())) =>
                        {
                            Some(reader.clone())
                        }
                        _ => None,
                    })
                    .collect(),
                _ => return Err(HardwareError::UnknownSession(session)),
            }
        };
        self.send(Command::Capture { session, readers })
    }

    fn close_session(&self, session: SessionId) {
        {
            let mut state = self.state();
            if !matches!(state.active, Some((active, _)) if active == session) {
                return;
            }
            state.active = None;
        }
        if let Err(e) = self.send(Command::CloseSession { session }) {
            tracing::debug!(error = %e, "Session close not delivered");
        }
    }
}

fn run_worker(device_id: String, events: EventSink, mut commands: mpsc::UnboundedReceiver<Command>) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(camera_index(&device_id), requested)
        .and_then(|mut camera| camera.open_stream().map(|()| camera))
    {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!(device = %device_id, error = %e, "Failed to open camera stream");
            events.post(HardwareEvent::DeviceError { device_id, code: -1 });
            return;
        }
    };
    events.post(HardwareEvent::Opened {
        device_id: device_id.clone(),
    });

    let mut active: Option<SessionId> = None;
    let mut repeating = false;
    let mut sequence: u64 = 0;

    loop {
        let command = if repeating {
            // Keep the preview stream flowing between commands.
            match commands.try_recv() {
                Ok(command) => command,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if let Err(e) = camera.frame() {
                        tracing::warn!(error = %e, "Preview frame dropped");
                    }
                    continue;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.blocking_recv() {
                Some(command) => command,
                None => break,
            }
        };

        match command {
            Command::Configure { session } => {
                if let Some(old) = active.replace(session) {
                    events.post(HardwareEvent::SessionClosed { session: old });
                }
                repeating = false;
                events.post(HardwareEvent::SessionConfigured { session });
            }
            Command::Repeating { session } => {
                repeating = active == Some(session);
            }
            Command::Capture { session, readers } => {
                if active != Some(session) {
                    continue;
                }
                sequence += 1;
                let frame = match grab_frame(&mut camera) {
                    Ok(frame) => frame,
                    Err(reason) => {
                        events.post(HardwareEvent::CaptureFailed { session, reason });
                        continue;
                    }
                };
                for reader in readers {
                    let delivered = encode_jpeg(&frame, reader.resolution())
                        .and_then(|bytes| reader.deliver(bytes).map_err(|e| e.to_string()));
                    match delivered {
                        Ok(()) => events.post(HardwareEvent::ImageAvailable {
                            reader: reader.id(),
                        }),
                        Err(e) => tracing::warn!(error = %e, "Still image refused by reader"),
                    }
                }
                tracing::debug!(sequence, "Still capture delivered");
            }
            Command::CloseSession { session } => {
                if active == Some(session) {
                    active = None;
                    repeating = false;
                    events.post(HardwareEvent::SessionClosed { session });
                }
            }
            Command::Shutdown => break,
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(device = %device_id, error = %e, "Failed to stop camera stream");
    }
}

fn grab_frame(camera: &mut Camera) -> Result<RgbImage, String> {
    let frame = camera.frame().map_err(|e| format!("frame: {e}"))?;
    let decoded = frame
        .decode_image::<RgbFormat>()
        .map_err(|e| format!("decode: {e}"))?;
    let (width, height) = (decoded.width(), decoded.height());
    RgbImage::from_raw(width, height, decoded.into_raw())
        .ok_or_else(|| "frame buffer size mismatch".to_string())
}

/// Encodes `frame` at the reader's negotiated size.
fn encode_jpeg(frame: &RgbImage, size: Resolution) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    let cursor = &mut Cursor::new(&mut bytes);
    let written = if frame.dimensions() == (size.width, size.height) {
        frame.write_to(cursor, ImageFormat::Jpeg)
    } else {
        imageops::resize(frame, size.width, size.height, FilterType::Triangle)
            .write_to(cursor, ImageFormat::Jpeg)
    };
    written.map_err(|e| format!("encode: {e}"))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_matches_reader_size() {
        let frame = RgbImage::new(1920, 1080);
        let bytes = encode_jpeg(&frame, Resolution::new(640, 480)).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn test_camera_index_parsing() {
        assert!(matches!(camera_index("2"), CameraIndex::Index(2)));
        assert!(matches!(
            camera_index("/dev/video0"),
            CameraIndex::String(ref path) if path == "/dev/video0"
        ));
    }
}
