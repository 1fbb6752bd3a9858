//! Mock camera backend for tests and demos.
//!
//! Generates synthetic JPEG frames and answers every request from a
//! background thread, the way real camera stacks deliver callbacks. Faults
//! (busy device, configuration failures, stalls, disconnects) can be
//! injected at runtime.

use super::backend::{
    CameraBackend, CaptureRequest, EventSink, HardwareError, HardwareEvent, OutputTarget,
    SessionId, TargetId,
};
use super::buffer::ReaderSurface;
use super::stream::Resolution;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A device the mock advertises.
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// Identifier reported by `device_ids`.
    pub id: String,
    /// Advertised preview sizes.
    pub output_sizes: Vec<Resolution>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            id: "0".to_string(),
            output_sizes: vec![
                Resolution::new(1920, 1080),
                Resolution::new(1280, 960),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
        }
    }
}

/// Everything the mock was asked to do, for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    /// Accepted `open_device` calls.
    pub opens: u32,
    /// `close_device` calls that closed an open device.
    pub closes: u32,
    /// Created sessions with their outputs.
    pub sessions: Vec<(SessionId, Vec<TargetId>)>,
    /// Repeating requests.
    pub repeating: Vec<(SessionId, CaptureRequest)>,
    /// One-shot capture requests.
    pub captures: Vec<(SessionId, CaptureRequest)>,
    /// Sessions closed while the device was open.
    pub closed_sessions: Vec<SessionId>,
    /// Reader outputs, in session order.
    pub readers: Vec<ReaderSurface>,
}

#[derive(Default)]
struct MockState {
    events: Option<EventSink>,
    open_device: Option<String>,
    busy: bool,
    fail_open: bool,
    configure_failures: u32,
    stall_configure: bool,
    stalled_configures: u32,
    late_disconnect: Option<Duration>,
    capture_failure: Option<String>,
    stall_images: bool,
    duplicate_images: bool,
    disconnect_on_capture: bool,
    next_session: u64,
    active: Option<(SessionId, Vec<OutputTarget>)>,
    frame_sequence: u8,
    log: MockLog,
}

/// Mock camera backend that generates synthetic frames.
pub struct MockBackend {
    devices: Vec<MockDevice>,
    callback_delay: Duration,
    state: Mutex<MockState>,
}

impl MockBackend {
    /// A single device with the default advertised sizes.
    pub fn new() -> Self {
        Self::with_devices(vec![MockDevice::default()])
    }

    /// Advertises the given devices, first one is selected by the session.
    pub fn with_devices(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            callback_delay: Duration::from_millis(5),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Delay applied before each callback is posted.
    pub fn with_callback_delay(mut self, delay: Duration) -> Self {
        self.callback_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes `open_device` report the device as held elsewhere.
    pub fn set_busy(&self, busy: bool) {
        self.state().busy = busy;
    }

    /// Makes the next open fail asynchronously with a device error.
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// The next `count` session configurations fail.
    pub fn fail_next_configures(&self, count: u32) {
        self.state().configure_failures = count;
    }

    /// Session configuration never reports back.
    pub fn set_stall_configure(&self, stall: bool) {
        self.state().stall_configure = stall;
    }

    /// The next `count` session configurations never report back.
    pub fn stall_next_configures(&self, count: u32) {
        self.state().stalled_configures = count;
    }

    /// After a device is closed, posts a stray `Disconnected` for it once
    /// `delay` has passed.
    pub fn set_late_disconnect(&self, delay: Option<Duration>) {
        self.state().late_disconnect = delay;
    }

    /// Still captures report a hardware failure.
    pub fn set_capture_failure(&self, reason: Option<String>) {
        self.state().capture_failure = reason;
    }

    /// Still captures never produce an image.
    pub fn set_stall_images(&self, stall: bool) {
        self.state().stall_images = stall;
    }

    /// Still captures try to deliver every image twice.
    pub fn set_duplicate_images(&self, duplicate: bool) {
        self.state().duplicate_images = duplicate;
    }

    /// The device disconnects when a still capture is issued.
    pub fn set_disconnect_on_capture(&self, disconnect: bool) {
        self.state().disconnect_on_capture = disconnect;
    }

    /// Simulates the device being unplugged.
    pub fn disconnect(&self) {
        let mut state = self.state();
        if let Some(device_id) = state.open_device.take() {
            state.active = None;
            let events = state.events.clone();
            drop(state);
            self.dispatch(events, vec![HardwareEvent::Disconnected { device_id }]);
        }
    }

    /// Returns true while a device is open.
    pub fn is_open(&self) -> bool {
        self.state().open_device.is_some()
    }

    /// Snapshot of the request log.
    pub fn log(&self) -> MockLog {
        self.state().log.clone()
    }

    /// Encodes a deterministic gradient frame as JPEG.
    pub fn synthetic_jpeg(resolution: Resolution, sequence: u8) -> Result<Vec<u8>, image::ImageError> {
        let width = resolution.width.max(1);
        let height = resolution.height.max(1);
        let frame = RgbImage::from_fn(width, height, |x, y| {
            // Simple deterministic pattern mixed with sequence
            Rgb([
                (x * 255 / width) as u8,
                (y * 255 / height) as u8,
                sequence,
            ])
        });
        let mut bytes = Vec::new();
        frame.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        Ok(bytes)
    }

    fn dispatch(&self, events: Option<EventSink>, batch: Vec<HardwareEvent>) {
        let Some(events) = events else {
            return;
        };
        let delay = self.callback_delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            for event in batch {
                events.post(event);
            }
        });
    }

    fn deliver_still(
        &self,
        events: Option<EventSink>,
        readers: Vec<ReaderSurface>,
        sequence: u8,
        duplicate: bool,
    ) {
        let Some(events) = events else {
            return;
        };
        let delay = self.callback_delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            for reader in readers {
                let bytes = match Self::synthetic_jpeg(reader.resolution(), sequence) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(error = %e, "Mock frame encoding failed");
                        continue;
                    }
                };
                let attempts = if duplicate { 2 } else { 1 };
                let mut delivered = false;
                for _ in 0..attempts {
                    match reader.deliver(bytes.clone()) {
                        Ok(()) => delivered = true,
                        Err(e) => tracing::debug!(reader = reader.id().0, error = %e, "Mock delivery refused"),
                    }
                }
                if delivered {
                    events.post(HardwareEvent::ImageAvailable { reader: reader.id() });
                }
            }
        });
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for MockBackend {
    fn device_ids(&self) -> Result<Vec<String>, HardwareError> {
        Ok(self.devices.iter().map(|d| d.id.clone()).collect())
    }

    fn output_sizes(&self, device_id: &str) -> Result<Vec<Resolution>, HardwareError> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.output_sizes.clone())
            .ok_or_else(|| HardwareError::DeviceNotFound(device_id.to_string()))
    }

    fn open_device(&self, device_id: &str, events: EventSink) -> Result<(), HardwareError> {
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(HardwareError::DeviceNotFound(device_id.to_string()));
        }
        let mut state = self.state();
        if state.busy || state.open_device.is_some() {
            return Err(HardwareError::Busy);
        }
        state.log.opens += 1;
        state.events = Some(events.clone());

        let event = if state.fail_open {
            state.fail_open = false;
            HardwareEvent::DeviceError {
                device_id: device_id.to_string(),
                code: 1,
            }
        } else {
            state.open_device = Some(device_id.to_string());
            HardwareEvent::Opened {
                device_id: device_id.to_string(),
            }
        };
        drop(state);

        tracing::info!(device = device_id, "MockBackend device open requested");
        self.dispatch(Some(events), vec![event]);
        Ok(())
    }

    fn close_device(&self, device_id: &str) {
        let mut state = self.state();
        if state.open_device.as_deref() == Some(device_id) {
            state.open_device = None;
            state.active = None;
            state.log.closes += 1;
            tracing::info!(device = device_id, "MockBackend device closed");

            if let (Some(delay), Some(events)) = (state.late_disconnect, state.events.clone()) {
                let device_id = device_id.to_string();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    events.post(HardwareEvent::Disconnected { device_id });
                });
            }
        }
    }

    fn create_session(&self, targets: Vec<OutputTarget>) -> Result<SessionId, HardwareError> {
        let mut state = self.state();
        if state.open_device.is_none() {
            return Err(HardwareError::Disconnected);
        }

        let mut batch = Vec::new();
        if let Some((old, _)) = state.active.take() {
            state.log.closed_sessions.push(old);
            batch.push(HardwareEvent::SessionClosed { session: old });
        }

        state.next_session += 1;
        let session = SessionId(state.next_session);
        let ids = targets.iter().map(OutputTarget::target_id).collect();
        state.log.sessions.push((session, ids));
        for target in &targets {
            if let OutputTarget::Reader(reader) = target {
                state.log.readers.push(reader.clone());
            }
        }

        if state.stall_configure {
            // no callback
        } else if state.stalled_configures > 0 {
            state.stalled_configures -= 1;
        } else if state.configure_failures > 0 {
            state.configure_failures -= 1;
            batch.push(HardwareEvent::SessionConfigureFailed { session });
        } else {
            batch.push(HardwareEvent::SessionConfigured { session });
        }
        state.active = Some((session, targets));
        let events = state.events.clone();
        drop(state);

        self.dispatch(events, batch);
        Ok(session)
    }

    fn set_repeating_request(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<(), HardwareError> {
        let mut state = self.state();
        if !matches!(state.active, Some((active, _)) if active == session) {
            return Err(HardwareError::UnknownSession(session));
        }
        state.log.repeating.push((session, request.clone()));
        Ok(())
    }

    fn capture(&self, session: SessionId, request: &CaptureRequest) -> Result<(), HardwareError> {
        let mut state = self.state();
        let readers: Vec<ReaderSurface> = match &state.active {
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
        };
        state.log.captures.push((session, request.clone()));
        state.frame_sequence = state.frame_sequence.wrapping_add(1);
        let sequence = state.frame_sequence;
        let events = state.events.clone();

        if state.disconnect_on_capture {
            let device_id = state.open_device.take().unwrap_or_default();
            state.active = None;
            drop(state);
            self.dispatch(events, vec![HardwareEvent::Disconnected { device_id }]);
        } else if let Some(reason) = state.capture_failure.clone() {
            drop(state);
            self.dispatch(events, vec![HardwareEvent::CaptureFailed { session, reason }]);
        } else if state.stall_images {
            // no callback
        } else {
            let duplicate = state.duplicate_images;
            drop(state);
            self.deliver_still(events, readers, sequence, duplicate);
        }
        Ok(())
    }

    fn close_session(&self, session: SessionId) {
        let mut state = self.state();
        if matches!(state.active, Some((active, _)) if active == session) {
            state.active = None;
            state.log.closed_sessions.push(session);
            let events = state.events.clone();
            drop(state);
            self.dispatch(events, vec![HardwareEvent::SessionClosed { session }]);
        }
    }
}
