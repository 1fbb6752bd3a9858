//! User-facing capture flow.
//!
//! Maps the host's input triggers onto session operations and owns the
//! review step: a captured image stays pending until the user saves it
//! (advancing the file counter) or cancels it (deleting the file).

use crate::config::{
    initialize_first_run, read_sequence, write_sequence, SettingsStore, StoreError,
};
use crate::device::{PreviewSurface, Resolution, StreamConfig, SurfaceId};
use crate::session::{CameraError, CameraSessionManager, HardwareHandle, SessionState};
use crate::storage::{FileNamer, MediaIndex, PersistedImage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Input from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A display surface of the given size can receive preview frames.
    PreviewSurfaceReady {
        /// Surface width in pixels.
        width: u32,
        /// Surface height in pixels.
        height: u32,
    },
    /// The shutter was pressed.
    CaptureRequested,
    /// The user kept the pending image.
    SaveConfirmed,
    /// The user discarded the pending image, or left the screen.
    CaptureCancelled,
}

/// What handling a trigger produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Preview is running with the negotiated stream.
    PreviewStarted(StreamConfig),
    /// An image was written and awaits review.
    Captured(PersistedImage),
    /// The pending image was kept.
    Saved {
        /// The kept image.
        image: PersistedImage,
        /// Sequence number the next capture will use.
        next_sequence: u32,
    },
    /// The pending image was deleted.
    Discarded(PersistedImage),
    /// The session was released.
    Closed,
}

/// Errors from the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The session operation failed.
    #[error(transparent)]
    Camera(#[from] CameraError),
    /// The settings store failed.
    #[error("settings store error: {0}")]
    Store(#[from] StoreError),
    /// Deleting a discarded image failed.
    #[error("file operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Save was requested with nothing to save.
    #[error("no captured image is awaiting review")]
    NoPendingCapture,
    /// The previous capture has not been saved or discarded.
    #[error("image {0} is awaiting review")]
    ReviewPending(String),
}

/// Drives one camera session from UI triggers.
pub struct CameraController {
    session: CameraSessionManager,
    store: Arc<dyn SettingsStore>,
    namer: FileNamer,
    media_index: Arc<dyn MediaIndex>,
    handle: Option<HardwareHandle>,
    pending: Option<PersistedImage>,
    next_surface: u64,
}

impl CameraController {
    /// Creates the controller, recording the first start in `store`.
    pub fn new(
        session: CameraSessionManager,
        store: Arc<dyn SettingsStore>,
        namer: FileNamer,
        media_index: Arc<dyn MediaIndex>,
    ) -> Result<Self, ControllerError> {
        if initialize_first_run(store.as_ref())? {
            debug!(media_root = %namer.media_root().display(), "First start");
        }
        Ok(Self {
            session,
            store,
            namer,
            media_index,
            handle: None,
            pending: None,
            next_surface: 1,
        })
    }

    /// Session this controller drives.
    pub fn session(&self) -> &CameraSessionManager {
        &self.session
    }

    /// Image captured but not yet saved or discarded.
    pub fn pending(&self) -> Option<&PersistedImage> {
        self.pending.as_ref()
    }

    /// Sequence number the next capture will use.
    pub fn next_sequence(&self) -> Result<u32, ControllerError> {
        Ok(read_sequence(self.store.as_ref())?)
    }

    /// Handles one trigger. A lost handle is dropped so the next preview reopens.
    pub async fn handle(&mut self, trigger: Trigger) -> Result<ControllerEvent, ControllerError> {
        debug!(?trigger, "Handling trigger");
        let result = match trigger {
            Trigger::PreviewSurfaceReady { width, height } => {
                self.preview(Resolution::new(width, height)).await
            }
            Trigger::CaptureRequested => self.capture().await,
            Trigger::SaveConfirmed => self.save(),
            Trigger::CaptureCancelled => self.cancel().await,
        };
        if let Err(ControllerError::Camera(e)) = &result {
            if e.is_terminal() {
                warn!(error = %e, "Camera handle lost");
                self.handle = None;
            }
        }
        result
    }

    async fn preview(&mut self, size: Resolution) -> Result<ControllerEvent, ControllerError> {
        // A new surface means the old binding is gone; start over.
        if self.session.state() != SessionState::Open {
            self.close().await?;
        }
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => self.session.open().await?,
        };
        let handle = self.handle.insert(handle);

        let surface = PreviewSurface::new(SurfaceId(self.next_surface));
        self.next_surface += 1;
        let stream = self.session.start_preview(handle, surface, size).await?;
        Ok(ControllerEvent::PreviewStarted(stream))
    }

    async fn capture(&mut self) -> Result<ControllerEvent, ControllerError> {
        if let Some(pending) = &self.pending {
            return Err(ControllerError::ReviewPending(pending.filename.clone()));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or(CameraError::HardwareDisconnected)?;

        let sequence = read_sequence(self.store.as_ref())?;
        let target = self.namer.target(sequence)?;
        let image = self.session.capture(handle, target).await?;
        info!(file = %image.filename, sequence, "Image captured, awaiting review");
        self.pending = Some(image.clone());
        Ok(ControllerEvent::Captured(image))
    }

    fn save(&mut self) -> Result<ControllerEvent, ControllerError> {
        let image = self.pending.take().ok_or(ControllerError::NoPendingCapture)?;
        let next_sequence = image.sequence.saturating_add(1);
        if let Err(e) = write_sequence(self.store.as_ref(), next_sequence) {
            self.pending = Some(image);
            return Err(e.into());
        }
        info!(file = %image.filename, next_sequence, "Image saved");
        Ok(ControllerEvent::Saved {
            image,
            next_sequence,
        })
    }

    async fn cancel(&mut self) -> Result<ControllerEvent, ControllerError> {
        let Some(image) = self.pending.take() else {
            self.close().await?;
            return Ok(ControllerEvent::Closed);
        };

        let path = image.path();
        let absolute = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Pending image already gone");
            }
            Err(e) => {
                self.pending = Some(image);
                return Err(e.into());
            }
        }
        self.media_index.file_removed(&absolute);
        info!(file = %image.filename, "Image discarded");
        Ok(ControllerEvent::Discarded(image))
    }

    /// Releases the camera.
    pub async fn close(&mut self) -> Result<(), ControllerError> {
        self.handle = None;
        self.session.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemorySettingsStore, FILE_NAME_KEY, FIRST_START_KEY};
    use crate::device::MockBackend;
    use crate::permissions::StaticPermissions;
    use crate::session::SessionConfig;
    use crate::storage::MemoryMediaIndex;
    use tempfile::TempDir;

    struct Fixture {
        controller: CameraController,
        store: Arc<MemorySettingsStore>,
        index: Arc<MemoryMediaIndex>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(MemoryMediaIndex::new());
        let store = Arc::new(MemorySettingsStore::new());
        let config = SessionConfig {
            pictures_dir: dir.path().join("Pictures"),
            ..SessionConfig::default()
        };
        let session = CameraSessionManager::builder(
            Arc::new(MockBackend::new()),
            Arc::new(StaticPermissions::granted()),
        )
        .media_index(index.clone())
        .config(config)
        .build();
        let controller = CameraController::new(
            session,
            store.clone(),
            FileNamer::new(dir.path()),
            index.clone(),
        )
        .unwrap();
        Fixture {
            controller,
            store,
            index,
            _dir: dir,
        }
    }

    const SURFACE: Trigger = Trigger::PreviewSurfaceReady {
        width: 640,
        height: 480,
    };

    #[tokio::test]
    async fn test_first_start_initializes_store() {
        let f = fixture();
        assert_eq!(f.store.get(FIRST_START_KEY).unwrap().as_deref(), Some("true"));
        assert_eq!(f.controller.next_sequence().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capture_and_save_advances_counter() {
        let mut f = fixture();
        let event = f.controller.handle(SURFACE).await.unwrap();
        assert!(matches!(event, ControllerEvent::PreviewStarted(_)));

        let ControllerEvent::Captured(image) =
            f.controller.handle(Trigger::CaptureRequested).await.unwrap()
        else {
            panic!("expected a capture");
        };
        assert_eq!(image.filename, "image1.png");
        assert!(image.path().exists());

        let saved = f.controller.handle(Trigger::SaveConfirmed).await.unwrap();
        assert!(matches!(saved, ControllerEvent::Saved { next_sequence: 2, .. }));
        assert_eq!(f.store.get(FILE_NAME_KEY).unwrap().as_deref(), Some("2"));

        let ControllerEvent::Captured(second) =
            f.controller.handle(Trigger::CaptureRequested).await.unwrap()
        else {
            panic!("expected a capture");
        };
        assert_eq!(second.filename, "image2.png");
    }

    #[tokio::test]
    async fn test_cancel_deletes_pending_image() {
        let mut f = fixture();
        f.controller.handle(SURFACE).await.unwrap();
        let ControllerEvent::Captured(image) =
            f.controller.handle(Trigger::CaptureRequested).await.unwrap()
        else {
            panic!("expected a capture");
        };

        let event = f.controller.handle(Trigger::CaptureCancelled).await.unwrap();
        assert_eq!(event, ControllerEvent::Discarded(image.clone()));
        assert!(!image.path().exists());
        assert_eq!(f.index.removed().len(), 1);
        assert_eq!(f.controller.next_sequence().unwrap(), 1);
        assert_eq!(f.controller.session().state(), SessionState::Previewing);
    }

    #[tokio::test]
    async fn test_cancel_without_pending_closes() {
        let mut f = fixture();
        f.controller.handle(SURFACE).await.unwrap();

        let event = f.controller.handle(Trigger::CaptureCancelled).await.unwrap();
        assert_eq!(event, ControllerEvent::Closed);
        assert_eq!(f.controller.session().state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_save_without_pending() {
        let mut f = fixture();
        assert!(matches!(
            f.controller.handle(Trigger::SaveConfirmed).await,
            Err(ControllerError::NoPendingCapture)
        ));
    }

    #[tokio::test]
    async fn test_capture_waits_for_review() {
        let mut f = fixture();
        f.controller.handle(SURFACE).await.unwrap();
        f.controller.handle(Trigger::CaptureRequested).await.unwrap();

        assert!(matches!(
            f.controller.handle(Trigger::CaptureRequested).await,
            Err(ControllerError::ReviewPending(_))
        ));
    }

    #[tokio::test]
    async fn test_new_surface_rebinds_preview() {
        let mut f = fixture();
        f.controller.handle(SURFACE).await.unwrap();
        let event = f
            .controller
            .handle(Trigger::PreviewSurfaceReady {
                width: 1000,
                height: 700,
            })
            .await
            .unwrap();
        let ControllerEvent::PreviewStarted(stream) = event else {
            panic!("expected preview");
        };
        assert_eq!(stream.resolution, Resolution::new(1280, 960));
        assert_eq!(f.controller.session().state(), SessionState::Previewing);
    }
}
