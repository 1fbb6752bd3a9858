//! Preview stream binding.

use super::error::CameraError;
use super::manager::{
    configure_error, CameraSessionManager, Hardware, HardwareHandle, PreviewBinding, Shared,
    WaitError,
};
use super::retry::Backoff;
use super::state::SessionState;
use super::stats::SessionCounters;
use crate::device::{
    CaptureRequest, HardwareEvent, OutputTarget, PreviewSurface, Resolution, StreamConfig,
};
use crate::permissions::Permission;

/// Configures a preview-only session and starts its repeating request.
pub(super) struct PreviewBinder<'a> {
    shared: &'a Shared,
}

impl<'a> PreviewBinder<'a> {
    pub(super) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    /// One binding attempt. The session is closed again if it fails.
    pub(super) async fn bind(
        &self,
        hw: &mut Hardware,
        mut surface: PreviewSurface,
        stream: StreamConfig,
    ) -> Result<PreviewBinding, CameraError> {
        let shared = self.shared;
        surface.set_buffer_size(stream.resolution);

        let session = shared
            .backend
            .create_session(vec![OutputTarget::Preview(surface.clone())])
            .map_err(configure_error)?;

        let configured = shared
            .wait_for(hw, shared.config.configure_timeout, |event| match event {
                HardwareEvent::SessionConfigured { session: s } if *s == session => Some(true),
                HardwareEvent::SessionConfigureFailed { session: s } if *s == session => {
                    Some(false)
                }
                _ => None,
            })
            .await;

        let failure = match configured {
            Ok(true) => {
                match shared
                    .backend
                    .set_repeating_request(session, &CaptureRequest::preview(surface.id()))
                {
                    Ok(()) => {
                        return Ok(PreviewBinding {
                            session,
                            surface,
                            stream,
                        })
                    }
                    Err(e) => configure_error(e),
                }
            }
            Ok(false) => CameraError::ConfigurationFailed("preview session rejected".to_string()),
            Err(WaitError::TimedOut) => CameraError::ConfigurationFailed(format!(
                "preview session not configured within {} ms",
                shared.config.configure_timeout.as_millis()
            )),
            Err(WaitError::Fatal(_)) => return Err(CameraError::HardwareDisconnected),
        };

        SessionCounters::bump(&shared.counters.configure_failures);
        shared.backend.close_session(session);
        Err(failure)
    }
}

impl CameraSessionManager {
    /// Binds the device to `surface` and starts continuous preview.
    ///
    /// The stream resolution is negotiated against `size` and the
    /// configured aspect ratio. On configuration failure the session stays
    /// `Open` so the caller may try again.
    pub async fn start_preview(
        &self,
        handle: &HardwareHandle,
        surface: PreviewSurface,
        size: Resolution,
    ) -> Result<StreamConfig, CameraError> {
        let shared = &*self.shared;
        shared.require(Permission::Camera).await?;

        let mut hw = shared.hardware.lock().await;
        shared.drain_events(&mut hw)?;
        shared.check_handle(handle)?;
        let state = shared.state();
        if state != SessionState::Open {
            return Err(CameraError::InvalidState {
                required: SessionState::Open,
                actual: state,
            });
        }

        let advertised = hw
            .live
            .as_ref()
            .map(|live| live.output_sizes.clone())
            .ok_or(CameraError::HardwareDisconnected)?;
        let stream = StreamConfig::negotiate(&advertised, size, shared.config.aspect)
            .ok_or_else(|| {
                CameraError::ConfigurationFailed("device advertises no output sizes".to_string())
            })?;

        let binder = PreviewBinder::new(shared);
        let mut backoff = Backoff::new(&shared.config.retry, "start_preview");
        let binding = loop {
            match binder.bind(&mut hw, surface.clone(), stream).await {
                Ok(binding) => break binding,
                Err(CameraError::HardwareDisconnected) => {
                    shared.force_release(&mut hw, "disconnected while starting preview");
                    return Err(CameraError::HardwareDisconnected);
                }
                Err(e) => {
                    if backoff.retry(&e).await {
                        continue;
                    }
                    tracing::warn!(error = %e, "Preview could not be started");
                    return Err(e);
                }
            }
        };

        let session = binding.session;
        if let Some(live) = hw.live.as_mut() {
            live.preview = Some(binding);
        }
        shared.transition(SessionState::Previewing)?;
        SessionCounters::bump(&shared.counters.previews_started);
        tracing::info!(
            session = session.0,
            resolution = %stream.resolution,
            fallback = stream.fallback,
            "Preview started"
        );
        Ok(stream)
    }
}
