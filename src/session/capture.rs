//! Still capture.
//!
//! A capture swaps the preview session for one that also feeds a
//! single-slot [`BufferReader`], issues exactly one still request, copies
//! the image out of the reader and hands it to the [`ImagePipeline`]. The
//! capture session and reader are released before preview is rebound, on
//! every path.
//!
//! [`ImagePipeline`]: crate::storage::ImagePipeline

use super::error::CameraError;
use super::manager::{
    configure_error, CameraSessionManager, Hardware, HardwareHandle, PreviewBinding, Shared,
    WaitError,
};
use super::preview::PreviewBinder;
use super::retry::Backoff;
use super::state::SessionState;
use super::stats::SessionCounters;
use crate::device::{
    BufferFormat, BufferReader, CaptureRequest, HardwareError, HardwareEvent, OutputTarget,
};
use crate::permissions::Permission;
use crate::storage::{PersistedImage, PipelineError, TransientCapture};
use tracing::Instrument;

/// Runs one capture under the hardware lock.
struct CaptureCoordinator<'a> {
    shared: &'a Shared,
}

impl<'a> CaptureCoordinator<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    async fn run(
        &self,
        handle: &HardwareHandle,
        target: &PersistedImage,
    ) -> Result<PersistedImage, CameraError> {
        let shared = self.shared;
        let mut guard = shared.hardware.lock().await;
        let hw = &mut *guard;
        shared.drain_events(hw)?;
        // close() may have run between the state check and the lock.
        shared.check_handle(handle)?;

        let Some(binding) = hw.live.as_ref().and_then(|live| live.preview.clone()) else {
            self.settle(hw, false)?;
            return Err(CameraError::CaptureFailed("no preview is bound".to_string()));
        };

        let artifact = match TransientCapture::create(&shared.config.pictures_dir) {
            Ok(artifact) => artifact,
            Err(e) => {
                self.settle(hw, true)?;
                return Err(CameraError::PersistenceFailed {
                    path: shared.config.pictures_dir.clone(),
                    source: PipelineError::Io(e),
                });
            }
        };
        tracing::Span::current().record("capture_id", artifact.name().as_str());

        let reader = BufferReader::new(binding.stream.resolution, BufferFormat::Jpeg);
        let shot = self.shoot(hw, &binding, &reader).await;
        if matches!(shot, Err(CameraError::HardwareDisconnected)) {
            self.release_reader(reader);
            shared.force_release(hw, "disconnected during capture");
            return Err(CameraError::HardwareDisconnected);
        }

        let closed = self.close_capture_session(hw).await;
        self.release_reader(reader);
        closed?;

        let resumed = self.resume_preview(hw, &binding).await?;
        let outcome = match shot {
            Ok(raw) => self.persist(raw, target).await,
            Err(e) => Err(e),
        };
        self.settle(hw, resumed)?;
        drop(artifact);
        outcome
    }

    /// Configures the capture session and takes one still image.
    async fn shoot(
        &self,
        hw: &mut Hardware,
        binding: &PreviewBinding,
        reader: &BufferReader,
    ) -> Result<Vec<u8>, CameraError> {
        let shared = self.shared;
        let targets = vec![
            OutputTarget::Reader(reader.surface()),
            OutputTarget::Preview(binding.surface.clone()),
        ];
        let session = shared
            .backend
            .create_session(targets)
            .map_err(configure_error)?;
        // The new session replaced the preview session.
        if let Some(live) = hw.live.as_mut() {
            live.preview = None;
            live.capture_session = Some(session);
        }

        let configured = shared
            .wait_for(hw, shared.config.configure_timeout, |event| match event {
                HardwareEvent::SessionConfigured { session: s } if *s == session => Some(true),
                HardwareEvent::SessionConfigureFailed { session: s } if *s == session => {
                    Some(false)
                }
                _ => None,
            })
            .await;
        match configured {
            Ok(true) => {}
            Ok(false) => {
                SessionCounters::bump(&shared.counters.configure_failures);
                return Err(CameraError::ConfigurationFailed(
                    "capture session rejected".to_string(),
                ));
            }
            Err(WaitError::TimedOut) => {
                SessionCounters::bump(&shared.counters.configure_failures);
                return Err(CameraError::ConfigurationFailed(format!(
                    "capture session not configured within {} ms",
                    shared.config.configure_timeout.as_millis()
                )));
            }
            Err(WaitError::Fatal(_)) => return Err(CameraError::HardwareDisconnected),
        }

        let request = CaptureRequest::still(reader.id(), binding.surface.id());
        shared
            .backend
            .capture(session, &request)
            .map_err(|e| match e {
                HardwareError::Disconnected => CameraError::HardwareDisconnected,
                other => CameraError::CaptureFailed(other.to_string()),
            })?;
        tracing::debug!(session = session.0, reader = reader.id().0, "Still capture issued");

        let reader_id = reader.id();
        let image = shared
            .wait_for(hw, shared.config.image_timeout, |event| match event {
                HardwareEvent::ImageAvailable { reader } if *reader == reader_id => Some(Ok(())),
                HardwareEvent::CaptureFailed { session: s, reason } if *s == session => {
                    Some(Err(reason.clone()))
                }
                _ => None,
            })
            .await;
        match image {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(CameraError::CaptureFailed(reason)),
            Err(WaitError::TimedOut) => {
                return Err(CameraError::CaptureFailed(format!(
                    "no image within {} ms",
                    shared.config.image_timeout.as_millis()
                )))
            }
            Err(WaitError::Fatal(_)) => return Err(CameraError::HardwareDisconnected),
        }

        let buffer = reader.acquire_latest().ok_or_else(|| {
            CameraError::CaptureFailed("image announced but reader is empty".to_string())
        })?;
        let raw = buffer.to_vec();
        drop(buffer);
        Ok(raw)
    }

    async fn close_capture_session(&self, hw: &mut Hardware) -> Result<(), CameraError> {
        let shared = self.shared;
        let Some(session) = hw.live.as_mut().and_then(|live| live.capture_session.take()) else {
            return Ok(());
        };
        shared.backend.close_session(session);

        let closed = shared
            .wait_for(hw, shared.config.close_timeout, |event| {
                matches!(event, HardwareEvent::SessionClosed { session: s } if *s == session)
                    .then_some(())
            })
            .await;
        match closed {
            Ok(()) => Ok(()),
            Err(WaitError::TimedOut) => {
                tracing::debug!(session = session.0, "No close acknowledgement");
                Ok(())
            }
            Err(WaitError::Fatal(_)) => {
                shared.force_release(hw, "disconnected while closing capture session");
                Err(CameraError::HardwareDisconnected)
            }
        }
    }

    fn release_reader(&self, reader: BufferReader) {
        let stats = reader.stats();
        drop(reader);
        let counters = &self.shared.counters;
        SessionCounters::add(&counters.buffers_acquired, stats.acquired);
        SessionCounters::add(&counters.buffers_released, stats.released);
    }

    /// Rebinds preview to the original surface.
    ///
    /// Returns `Ok(false)` when configuration keeps failing; the session
    /// then stays open without preview.
    async fn resume_preview(
        &self,
        hw: &mut Hardware,
        binding: &PreviewBinding,
    ) -> Result<bool, CameraError> {
        let shared = self.shared;
        if hw.live.as_ref().is_some_and(|live| live.preview.is_some()) {
            return Ok(true);
        }

        let binder = PreviewBinder::new(shared);
        let mut backoff = Backoff::new(&shared.config.retry, "resume_preview");
        loop {
            match binder.bind(hw, binding.surface.clone(), binding.stream).await {
                Ok(rebound) => {
                    if let Some(live) = hw.live.as_mut() {
                        live.preview = Some(rebound);
                    }
                    return Ok(true);
                }
                Err(CameraError::HardwareDisconnected) => {
                    shared.force_release(hw, "disconnected while resuming preview");
                    return Err(CameraError::HardwareDisconnected);
                }
                Err(e) => {
                    if backoff.retry(&e).await {
                        continue;
                    }
                    tracing::warn!(error = %e, "Preview not restored after capture");
                    return Ok(false);
                }
            }
        }
    }

    async fn persist(
        &self,
        raw: Vec<u8>,
        target: &PersistedImage,
    ) -> Result<PersistedImage, CameraError> {
        let shared = self.shared;
        let path = target.path();
        let written = shared
            .pipeline
            .persist_blocking(raw, path.clone())
            .await
            .map_err(|source| CameraError::PersistenceFailed { path, source })?;

        let absolute = std::fs::canonicalize(&written.path).unwrap_or(written.path);
        shared.media_index.file_added(&absolute);
        SessionCounters::add(&shared.counters.bytes_written, written.bytes);
        tracing::info!(
            path = %absolute.display(),
            width = written.width,
            height = written.height,
            bytes = written.bytes,
            "Image saved"
        );
        Ok(target.clone())
    }

    /// Leaves `Capturing` for `Previewing`, or `Open` without preview.
    fn settle(&self, hw: &mut Hardware, previewing: bool) -> Result<(), CameraError> {
        let shared = self.shared;
        if shared.state() != SessionState::Capturing {
            return Ok(());
        }
        if previewing {
            shared.transition(SessionState::Previewing)?;
        } else {
            if let Some(live) = hw.live.as_mut() {
                live.preview = None;
            }
            shared.transition(SessionState::Open)?;
        }
        Ok(())
    }
}

impl CameraSessionManager {
    /// Takes one still image and saves it to `target`.
    ///
    /// Requires `Previewing`. A second call while a capture is in flight
    /// fails immediately with [`CameraError::Busy`]. On configuration,
    /// capture or persistence failure the session returns to preview.
    ///
    /// Dropping the returned future mid-capture leaves the session in
    /// `Capturing`; call [`CameraSessionManager::close`] afterwards to
    /// release the capture session and the device. No image appears at
    /// `target` unless the future completes.
    pub async fn capture(
        &self,
        handle: &HardwareHandle,
        target: PersistedImage,
    ) -> Result<PersistedImage, CameraError> {
        let shared = &*self.shared;
        shared.require(Permission::Camera).await?;
        shared.require(Permission::StorageWrite).await?;

        let started = shared.with_machine(|machine| {
            if machine.generation() != Some(handle.generation()) {
                return Err(CameraError::HardwareDisconnected);
            }
            match machine.state() {
                SessionState::Previewing => machine.transition(SessionState::Capturing).map(|_| ()),
                SessionState::Capturing => Err(CameraError::Busy),
                actual => Err(CameraError::InvalidState {
                    required: SessionState::Previewing,
                    actual,
                }),
            }
        });
        if let Err(e) = started {
            if matches!(e, CameraError::Busy) {
                SessionCounters::bump(&shared.counters.busy_rejections);
                tracing::debug!("Capture rejected, another is in flight");
            }
            return Err(e);
        }

        let span = tracing::info_span!(
            "capture",
            sequence = target.sequence,
            capture_id = tracing::field::Empty
        );
        let result = CaptureCoordinator::new(shared)
            .run(handle, &target)
            .instrument(span)
            .await;

        match &result {
            Ok(saved) => {
                SessionCounters::bump(&shared.counters.captures_succeeded);
                tracing::debug!(file = %saved.filename, "Capture complete");
            }
            Err(e) => {
                SessionCounters::bump(&shared.counters.captures_failed);
                tracing::warn!(error = %e, kind = e.kind(), "Capture failed");
            }
        }
        result
    }
}
