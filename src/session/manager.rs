//! Camera session ownership.
//!
//! [`CameraSessionManager`] is the single owner of the camera device. It
//! opens and releases the hardware handle, consumes every hardware event
//! and drives the [`StateMachine`]. Operations that touch the device hold
//! the hardware lock for their whole duration, so the event stream for a
//! device is always processed by exactly one task at a time.

use super::error::CameraError;
use super::retry::Backoff;
use super::state::{SessionState, StateMachine};
use super::stats::{SessionCounters, SessionStats};
use crate::config::{FileConfig, RetryConfig};
use crate::device::{
    AspectRatio, CameraBackend, EventSink, HardwareError, HardwareEvent, PreviewSurface,
    Resolution, SessionId, StreamConfig,
};
use crate::permissions::{Permission, PermissionProvider};
use crate::storage::{ImagePipeline, LogMediaIndex, MediaIndex};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Timeouts and policies used by the session owner.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait for the device to report it is open.
    pub open_timeout: Duration,
    /// Wait for a capture session to configure.
    pub configure_timeout: Duration,
    /// Wait for a still image after the request is issued.
    pub image_timeout: Duration,
    /// Wait for a capture session to acknowledge closing.
    pub close_timeout: Duration,
    /// Preview aspect ratio.
    pub aspect: AspectRatio,
    /// Backoff for transient open and configuration failures.
    pub retry: RetryConfig,
    /// Directory receiving per-capture transient artifacts.
    pub pictures_dir: PathBuf,
}

impl SessionConfig {
    /// Converts the millisecond settings of a loaded configuration file.
    pub fn from_file_config(config: &FileConfig) -> Self {
        Self {
            open_timeout: Duration::from_millis(config.camera.open_timeout_ms),
            configure_timeout: Duration::from_millis(config.capture.configure_timeout_ms),
            image_timeout: Duration::from_millis(config.capture.image_timeout_ms),
            close_timeout: Duration::from_millis(config.capture.close_timeout_ms),
            aspect: config.preview.aspect,
            retry: config.retry.clone(),
            pictures_dir: config.storage.pictures_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file_config(&FileConfig::default())
    }
}

/// Proof of exclusive device ownership.
///
/// Handles are not `Clone`. A handle outlived by a close or a disconnect
/// is stale, and every operation given one fails with
/// [`CameraError::HardwareDisconnected`].
#[derive(Debug, PartialEq, Eq)]
pub struct HardwareHandle {
    device_id: String,
    generation: u64,
}

impl HardwareHandle {
    /// Device this handle owns.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Open generation, unique per successful open.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The preview session currently bound to a surface.
#[derive(Debug, Clone)]
pub(super) struct PreviewBinding {
    pub(super) session: SessionId,
    pub(super) surface: PreviewSurface,
    pub(super) stream: StreamConfig,
}

/// Hardware held by the open handle.
#[derive(Debug)]
pub(super) struct LiveDevice {
    pub(super) device_id: String,
    pub(super) generation: u64,
    pub(super) output_sizes: Vec<Resolution>,
    pub(super) preview: Option<PreviewBinding>,
    pub(super) capture_session: Option<SessionId>,
}

/// Everything only the lock holder may touch.
///
/// Every open attempt gets a fresh event queue, so callbacks for an
/// earlier handle never reach a later one.
pub(super) struct Hardware {
    pub(super) events: mpsc::UnboundedReceiver<HardwareEvent>,
    pub(super) sink: EventSink,
    pub(super) live: Option<LiveDevice>,
}

impl Hardware {
    fn new() -> Self {
        let (sink, events) = EventSink::channel();
        Self {
            events,
            sink,
            live: None,
        }
    }

    /// Swaps in a new event queue and returns its sending half.
    ///
    /// Events still bound for the old queue are dropped.
    fn renew_events(&mut self) -> EventSink {
        *self = Self {
            live: self.live.take(),
            ..Self::new()
        };
        self.sink.clone()
    }
}

/// Why waiting for a hardware event ended without a match.
#[derive(Debug)]
pub(super) enum WaitError {
    TimedOut,
    Fatal(HardwareEvent),
}

pub(super) struct Shared {
    pub(super) backend: Arc<dyn CameraBackend>,
    pub(super) permissions: Arc<dyn PermissionProvider>,
    pub(super) media_index: Arc<dyn MediaIndex>,
    pub(super) pipeline: ImagePipeline,
    pub(super) config: SessionConfig,
    pub(super) counters: SessionCounters,
    machine: Mutex<StateMachine>,
    state_tx: watch::Sender<SessionState>,
    pub(super) hardware: tokio::sync::Mutex<Hardware>,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn state(&self) -> SessionState {
        self.machine().state()
    }

    /// Runs `f` on the state machine and publishes the resulting state.
    pub(super) fn with_machine<T>(
        &self,
        f: impl FnOnce(&mut StateMachine) -> Result<T, CameraError>,
    ) -> Result<T, CameraError> {
        let mut machine = self.machine();
        let before = machine.state();
        let result = f(&mut machine);
        let after = machine.state();
        if before != after {
            self.state_tx.send_replace(after);
        }
        result
    }

    pub(super) fn transition(&self, next: SessionState) -> Result<SessionState, CameraError> {
        self.with_machine(|machine| machine.transition(next))
    }

    /// Fails unless `handle` belongs to the live open generation.
    pub(super) fn check_handle(&self, handle: &HardwareHandle) -> Result<(), CameraError> {
        if self.machine().generation() == Some(handle.generation) {
            Ok(())
        } else {
            Err(CameraError::HardwareDisconnected)
        }
    }

    /// Fails with `PermissionDenied`, force-closing the device, if
    /// `permission` was revoked.
    pub(super) async fn require(&self, permission: Permission) -> Result<(), CameraError> {
        if self.permissions.is_granted(permission) {
            return Ok(());
        }
        tracing::warn!(%permission, "Permission revoked, releasing camera");
        let mut hw = self.hardware.lock().await;
        if hw.live.is_some() {
            self.force_release(&mut hw, "permission revoked");
        }
        Err(CameraError::PermissionDenied(permission))
    }

    fn fatal_for_live(hw: &Hardware, event: &HardwareEvent) -> bool {
        event.is_fatal()
            && event
                .device_id()
                .zip(hw.live.as_ref())
                .is_some_and(|(device, live)| live.device_id == device)
    }

    /// Applies queued events without waiting.
    ///
    /// Returns `HardwareDisconnected` after releasing the handle if the live
    /// device died while nobody was listening.
    pub(super) fn drain_events(&self, hw: &mut Hardware) -> Result<(), CameraError> {
        while let Ok(event) = hw.events.try_recv() {
            if Self::fatal_for_live(hw, &event) {
                self.force_release(hw, "device lost");
                return Err(CameraError::HardwareDisconnected);
            }
            tracing::trace!(?event, "Stale hardware event ignored");
        }
        Ok(())
    }

    /// Waits until `pick` accepts an event.
    ///
    /// Events `pick` rejects are stale callbacks from earlier sessions and
    /// are dropped, except fatal events for the live device which end the
    /// wait.
    pub(super) async fn wait_for<T>(
        &self,
        hw: &mut Hardware,
        timeout: Duration,
        mut pick: impl FnMut(&HardwareEvent) -> Option<T>,
    ) -> Result<T, WaitError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, hw.events.recv()).await {
                Ok(Some(event)) => event,
                // The sink lives in `hw`, the channel cannot close under us.
                Ok(None) | Err(_) => return Err(WaitError::TimedOut),
            };
            if let Some(found) = pick(&event) {
                return Ok(found);
            }
            if Self::fatal_for_live(hw, &event) {
                return Err(WaitError::Fatal(event));
            }
            tracing::trace!(?event, "Stale hardware event ignored");
        }
    }

    /// Closes whatever the live device still holds, capture session first.
    fn teardown(&self, live: &LiveDevice) {
        if let Some(session) = live.capture_session {
            self.backend.close_session(session);
        }
        if let Some(preview) = &live.preview {
            self.backend.close_session(preview.session);
        }
        self.backend.close_device(&live.device_id);
    }

    /// Drops the handle after a fatal failure and enters `Error`.
    pub(super) fn force_release(&self, hw: &mut Hardware, reason: &'static str) {
        if let Some(live) = hw.live.take() {
            tracing::warn!(device = %live.device_id, generation = live.generation, reason, "Releasing camera handle");
            self.teardown(&live);
            SessionCounters::bump(&self.counters.disconnects);
        }
        let entered = self.with_machine(|machine| {
            if machine.state().can_transition_to(SessionState::Error) {
                machine.transition(SessionState::Error).map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(e) = entered {
            tracing::error!(error = %e, "Failed to enter error state");
        }
    }
}

/// Maps a synchronous hardware error raised while configuring.
pub(super) fn configure_error(error: HardwareError) -> CameraError {
    match error {
        HardwareError::Disconnected => CameraError::HardwareDisconnected,
        other => CameraError::ConfigurationFailed(other.to_string()),
    }
}

fn unavailable(error: HardwareError) -> CameraError {
    CameraError::DeviceUnavailable(error.to_string())
}

/// Builder for [`CameraSessionManager`].
pub struct SessionBuilder {
    backend: Arc<dyn CameraBackend>,
    permissions: Arc<dyn PermissionProvider>,
    media_index: Arc<dyn MediaIndex>,
    pipeline: ImagePipeline,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Receives saved files. Defaults to [`LogMediaIndex`].
    pub fn media_index(mut self, media_index: Arc<dyn MediaIndex>) -> Self {
        self.media_index = media_index;
        self
    }

    /// Converts and writes captures. Defaults to a quarter turn clockwise.
    pub fn pipeline(mut self, pipeline: ImagePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Timeouts and retry policy.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates a manager in `Closed`.
    pub fn build(self) -> CameraSessionManager {
        let (state_tx, _) = watch::channel(SessionState::Closed);
        CameraSessionManager {
            shared: Arc::new(Shared {
                backend: self.backend,
                permissions: self.permissions,
                media_index: self.media_index,
                pipeline: self.pipeline,
                config: self.config,
                counters: SessionCounters::default(),
                machine: Mutex::new(StateMachine::default()),
                state_tx,
                hardware: tokio::sync::Mutex::new(Hardware::new()),
            }),
        }
    }
}

/// Owner of the camera session.
///
/// Cheap to clone; all clones drive the same device.
#[derive(Clone)]
pub struct CameraSessionManager {
    pub(super) shared: Arc<Shared>,
}

impl CameraSessionManager {
    /// Starts building a manager over `backend`, checking `permissions` on every operation.
    pub fn builder(
        backend: Arc<dyn CameraBackend>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> SessionBuilder {
        SessionBuilder {
            backend,
            permissions,
            media_index: Arc::new(LogMediaIndex),
            pipeline: ImagePipeline::default(),
            config: SessionConfig::default(),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Counter snapshot with the current state.
    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot(self.state())
    }

    /// Acquires exclusive ownership of the first enumerated device.
    ///
    /// Transient failures are retried with bounded backoff. A session in
    /// `Error` is settled to `Closed` before a new open starts.
    pub async fn open(&self) -> Result<HardwareHandle, CameraError> {
        let shared = &*self.shared;
        if !shared.permissions.is_granted(Permission::Camera) {
            tracing::warn!("Camera permission not granted");
            return Err(CameraError::PermissionDenied(Permission::Camera));
        }

        let mut hw = shared.hardware.lock().await;
        // A dead handle found here is released and the open proceeds.
        if let Err(e) = shared.drain_events(&mut hw) {
            tracing::debug!(error = %e, "Released lost handle before opening");
        }
        if hw.live.is_some() || shared.state().holds_handle() {
            return Err(CameraError::AlreadyOpen);
        }
        if shared.state() == SessionState::Error {
            shared.transition(SessionState::Closed)?;
        }

        let mut backoff = Backoff::new(&shared.config.retry, "open");
        loop {
            match self.open_once(&mut hw).await {
                Ok(handle) => {
                    SessionCounters::bump(&shared.counters.opens);
                    return Ok(handle);
                }
                Err(e) => {
                    if backoff.retry(&e).await {
                        continue;
                    }
                    SessionCounters::bump(&shared.counters.open_failures);
                    tracing::warn!(error = %e, "Camera open failed");
                    return Err(e);
                }
            }
        }
    }

    async fn open_once(&self, hw: &mut Hardware) -> Result<HardwareHandle, CameraError> {
        let shared = &*self.shared;
        let device_id = shared
            .backend
            .device_ids()
            .map_err(unavailable)?
            .into_iter()
            .next()
            .ok_or_else(|| CameraError::DeviceUnavailable("no camera devices".to_string()))?;
        let output_sizes = shared.backend.output_sizes(&device_id).map_err(unavailable)?;

        let generation = shared.with_machine(|machine| {
            machine.transition(SessionState::Opening)?;
            machine
                .generation()
                .ok_or(CameraError::InvalidState {
                    required: SessionState::Opening,
                    actual: machine.state(),
                })
        })?;

        let sink = hw.renew_events();
        if let Err(e) = shared.backend.open_device(&device_id, sink) {
            shared.transition(SessionState::Closed)?;
            return Err(unavailable(e));
        }

        let outcome = shared
            .wait_for(hw, shared.config.open_timeout, |event| match event {
                HardwareEvent::Opened { device_id: d } if *d == device_id => Some(Ok(())),
                _ if event.is_fatal() && event.device_id() == Some(device_id.as_str()) => {
                    Some(Err(event.clone()))
                }
                _ => None,
            })
            .await;

        let reason = match outcome {
            Ok(Ok(())) => {
                hw.live = Some(LiveDevice {
                    device_id: device_id.clone(),
                    generation,
                    output_sizes,
                    preview: None,
                    capture_session: None,
                });
                shared.transition(SessionState::Open)?;
                tracing::info!(device = %device_id, generation, "Camera opened");
                return Ok(HardwareHandle {
                    device_id,
                    generation,
                });
            }
            Ok(Err(event)) => format!("open rejected: {event:?}"),
            Err(_) => format!(
                "no open callback within {} ms",
                shared.config.open_timeout.as_millis()
            ),
        };

        shared.backend.close_device(&device_id);
        shared.transition(SessionState::Closed)?;
        Err(CameraError::DeviceUnavailable(reason))
    }

    /// Releases everything the session holds and returns to `Closed`.
    ///
    /// Waits for an in-flight capture to finish. Calling it on a closed
    /// session is a no-op.
    pub async fn close(&self) -> Result<(), CameraError> {
        let shared = &*self.shared;
        let mut hw = shared.hardware.lock().await;
        if let Some(live) = hw.live.take() {
            shared.teardown(&live);
            tracing::info!(device = %live.device_id, generation = live.generation, "Camera closed");
        }
        // Acks for the sessions closed above are not needed.
        while hw.events.try_recv().is_ok() {}
        if shared.state() != SessionState::Closed {
            shared.transition(SessionState::Closed)?;
        }
        Ok(())
    }

    /// Processes hardware events that arrived while idle.
    ///
    /// Hosts call this periodically so disconnects are noticed between
    /// operations.
    pub async fn pump_events(&self) -> Result<(), CameraError> {
        let mut hw = self.shared.hardware.lock().await;
        self.shared.drain_events(&mut hw)
    }
}
