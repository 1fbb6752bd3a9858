use super::*;
use crate::config::RetryConfig;
use crate::device::{
    AspectRatio, ControlMode, MockBackend, PreviewSurface, RequestTemplate, Resolution, SurfaceId,
    TargetId,
};
use crate::permissions::{Permission, StaticPermissions};
use crate::storage::{FileNamer, MemoryMediaIndex, PersistedImage, PipelineError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    mock: Arc<MockBackend>,
    permissions: Arc<StaticPermissions>,
    index: Arc<MemoryMediaIndex>,
    manager: CameraSessionManager,
    namer: FileNamer,
    dir: TempDir,
}

fn test_config(root: &Path, retry: RetryConfig) -> SessionConfig {
    SessionConfig {
        open_timeout: Duration::from_millis(1000),
        configure_timeout: Duration::from_millis(300),
        image_timeout: Duration::from_millis(500),
        close_timeout: Duration::from_millis(200),
        aspect: AspectRatio::default(),
        retry,
        pictures_dir: root.join("Pictures"),
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

fn fixture_with(mock: MockBackend, retry: RetryConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(mock);
    let permissions = Arc::new(StaticPermissions::granted());
    let index = Arc::new(MemoryMediaIndex::new());
    let manager = CameraSessionManager::builder(mock.clone(), permissions.clone())
        .media_index(index.clone())
        .config(test_config(dir.path(), retry))
        .build();
    let namer = FileNamer::new(dir.path().join("media"));
    Fixture {
        mock,
        permissions,
        index,
        manager,
        namer,
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(MockBackend::new(), fast_retry())
}

fn surface() -> PreviewSurface {
    PreviewSurface::new(SurfaceId(1))
}

async fn previewing(f: &Fixture) -> HardwareHandle {
    let handle = f.manager.open().await.unwrap();
    f.manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap();
    handle
}

#[tokio::test]
async fn test_open_requires_camera_permission() {
    let f = fixture();
    f.permissions.set(Permission::Camera, false);

    let err = f.manager.open().await.unwrap_err();
    assert!(matches!(err, CameraError::PermissionDenied(Permission::Camera)));
    assert_eq!(f.manager.state(), SessionState::Closed);
    assert_eq!(f.mock.log().opens, 0);
}

#[tokio::test]
async fn test_capture_saves_first_image() {
    let f = fixture();
    let handle = previewing(&f).await;

    let target = f.namer.target(1).unwrap();
    let saved = f.manager.capture(&handle, target.clone()).await.unwrap();

    assert_eq!(saved, target);
    assert_eq!(saved.filename, "image1.png");
    assert!(saved.path().exists());
    assert_eq!(f.manager.state(), SessionState::Previewing);

    // 640x480 preview stream, rotated a quarter turn on save.
    let decoded = image::open(saved.path()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (480, 640));

    let expected = std::fs::canonicalize(saved.path()).unwrap();
    assert_eq!(f.index.files(), vec![expected]);

    let log = f.mock.log();
    assert_eq!(log.captures.len(), 1);
    let (_, request) = &log.captures[0];
    assert_eq!(request.template, RequestTemplate::StillCapture);
    assert_eq!(request.control_mode, ControlMode::Auto);
    assert!(request.targets.contains(&TargetId::Surface(SurfaceId(1))));

    // The transient artifact is gone once the capture finished.
    let leftovers = std::fs::read_dir(f.dir.path().join("Pictures"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);

    let stats = f.manager.stats();
    assert_eq!(stats.captures_succeeded, 1);
    assert_eq!(stats.buffers_acquired, 1);
    assert_eq!(stats.buffers_released, 1);
}

#[tokio::test]
async fn test_second_concurrent_capture_is_busy() {
    let f = fixture_with(
        MockBackend::new().with_callback_delay(Duration::from_millis(30)),
        fast_retry(),
    );
    let handle = previewing(&f).await;

    let (first, second) = tokio::join!(
        f.manager.capture(&handle, f.namer.target(1).unwrap()),
        f.manager.capture(&handle, f.namer.target(2).unwrap()),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(CameraError::Busy)));
    assert_eq!(f.mock.log().captures.len(), 1);
    assert!(!f.namer.next_path(2).unwrap().exists());
    assert_eq!(f.manager.state(), SessionState::Previewing);
    assert_eq!(f.manager.stats().busy_rejections, 1);
}

#[tokio::test]
async fn test_preview_configuration_failure_stays_open() {
    let f = fixture_with(MockBackend::new(), RetryConfig::none());
    let handle = f.manager.open().await.unwrap();

    f.mock.fail_next_configures(1);
    let err = f
        .manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::ConfigurationFailed(_)));
    assert_eq!(f.manager.state(), SessionState::Open);

    let stream = f
        .manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap();
    assert_eq!(stream.resolution, Resolution::new(640, 480));
    assert_eq!(f.manager.state(), SessionState::Previewing);
}

#[tokio::test]
async fn test_preview_retries_transient_failures() {
    let f = fixture();
    let handle = f.manager.open().await.unwrap();

    f.mock.fail_next_configures(2);
    f.manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap();

    assert_eq!(f.manager.state(), SessionState::Previewing);
    assert_eq!(f.manager.stats().configure_failures, 2);
    assert_eq!(f.mock.log().repeating.len(), 1);
}

#[tokio::test]
async fn test_preview_negotiates_aspect_ratio() {
    let f = fixture();
    let handle = f.manager.open().await.unwrap();

    let stream = f
        .manager
        .start_preview(&handle, surface(), Resolution::new(1000, 700))
        .await
        .unwrap();
    assert_eq!(stream.resolution, Resolution::new(1280, 960));
    assert!(!stream.fallback);
}

#[tokio::test]
async fn test_capture_configuration_failure_returns_to_preview() {
    let f = fixture_with(MockBackend::new(), RetryConfig::none());
    let handle = previewing(&f).await;

    f.mock.fail_next_configures(1);
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::ConfigurationFailed(_)));
    assert_eq!(f.manager.state(), SessionState::Previewing);
    let log = f.mock.log();
    assert!(log.captures.is_empty());
    assert!(log.readers[0].is_closed());
    assert!(f.index.files().is_empty());
}

#[tokio::test]
async fn test_persistence_failure_releases_reader() {
    let f = fixture();
    let handle = previewing(&f).await;

    // A plain file where the image directory should be.
    let blocker = f.dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let target = PersistedImage {
        directory: blocker,
        filename: FileNamer::file_name(1),
        sequence: 1,
    };

    let err = f.manager.capture(&handle, target).await.unwrap_err();
    assert!(matches!(err, CameraError::PersistenceFailed { .. }));
    assert_eq!(f.manager.state(), SessionState::Previewing);

    let reader = &f.mock.log().readers[0];
    assert!(reader.is_closed());
    let buffers = reader.stats();
    assert_eq!(buffers.acquired, 1);
    assert_eq!(buffers.released, 1);

    let stats = f.manager.stats();
    assert_eq!(stats.buffers_acquired, stats.buffers_released);
    assert_eq!(stats.captures_failed, 1);
    assert!(f.index.files().is_empty());
}

#[tokio::test]
async fn test_never_overwrites_existing_image() {
    let f = fixture();
    let handle = previewing(&f).await;

    let target = f.namer.target(1).unwrap();
    std::fs::write(target.path(), b"earlier capture").unwrap();

    let err = f.manager.capture(&handle, target.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        CameraError::PersistenceFailed {
            source: PipelineError::AlreadyExists(_),
            ..
        }
    ));
    assert_eq!(std::fs::read(target.path()).unwrap(), b"earlier capture");
    assert_eq!(f.manager.state(), SessionState::Previewing);
}

#[tokio::test]
async fn test_hardware_capture_failure() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.set_capture_failure(Some("focus lost".to_string()));
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::CaptureFailed(ref reason) if reason == "focus lost"));
    assert_eq!(f.manager.state(), SessionState::Previewing);

    f.mock.set_capture_failure(None);
    f.manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_image_times_out() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.set_stall_images(true);
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::CaptureFailed(_)));
    assert_eq!(f.manager.state(), SessionState::Previewing);
    assert!(f.mock.log().readers[0].is_closed());
}

#[tokio::test]
async fn test_duplicate_image_delivered_once() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.set_duplicate_images(true);
    f.manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap();

    let buffers = f.mock.log().readers[0].stats();
    assert_eq!(buffers.delivered, 1);
    assert_eq!(buffers.rejected, 1);
    assert_eq!(f.index.files().len(), 1);
}

#[tokio::test]
async fn test_capture_requires_preview() {
    let f = fixture();
    let handle = f.manager.open().await.unwrap();

    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CameraError::InvalidState {
            required: SessionState::Previewing,
            actual: SessionState::Open
        }
    ));
}

#[tokio::test]
async fn test_second_open_is_rejected() {
    let f = fixture();
    let _handle = f.manager.open().await.unwrap();

    assert!(matches!(
        f.manager.open().await,
        Err(CameraError::AlreadyOpen)
    ));
    assert_eq!(f.mock.log().opens, 1);
}

#[tokio::test]
async fn test_busy_device_is_unavailable() {
    let f = fixture();
    f.mock.set_busy(true);

    let err = f.manager.open().await.unwrap_err();
    assert!(matches!(err, CameraError::DeviceUnavailable(_)));
    assert_eq!(f.manager.state(), SessionState::Closed);
    assert_eq!(f.manager.stats().open_failures, 1);
}

#[tokio::test]
async fn test_open_retries_after_device_error() {
    let f = fixture();
    f.mock.set_fail_open(true);

    f.manager.open().await.unwrap();
    assert_eq!(f.mock.log().opens, 2);
    assert_eq!(f.manager.state(), SessionState::Open);
}

#[tokio::test]
async fn test_no_devices() {
    let f = fixture_with(MockBackend::with_devices(Vec::new()), RetryConfig::none());
    let err = f.manager.open().await.unwrap_err();
    assert!(matches!(err, CameraError::DeviceUnavailable(_)));
}

#[tokio::test]
async fn test_disconnect_while_previewing() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        f.manager.pump_events().await,
        Err(CameraError::HardwareDisconnected)
    ));
    assert_eq!(f.manager.state(), SessionState::Error);
    assert_eq!(f.manager.stats().disconnects, 1);

    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::HardwareDisconnected));

    // A fresh open settles the error and starts over.
    let reopened = f.manager.open().await.unwrap();
    assert!(reopened.generation() > handle.generation());
    assert_eq!(f.manager.state(), SessionState::Open);
}

#[tokio::test]
async fn test_disconnect_during_capture() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.set_disconnect_on_capture(true);
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::HardwareDisconnected));
    assert_eq!(f.manager.state(), SessionState::Error);
    assert!(f.mock.log().readers[0].is_closed());
    assert!(!f.mock.is_open());
}

#[tokio::test]
async fn test_revoked_storage_permission_forces_close() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.permissions.set(Permission::StorageWrite, false);
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CameraError::PermissionDenied(Permission::StorageWrite)
    ));
    assert_eq!(f.manager.state(), SessionState::Error);
    assert!(!f.mock.is_open());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.manager.close().await.unwrap();
    assert_eq!(f.manager.state(), SessionState::Closed);
    assert!(!f.mock.is_open());
    assert_eq!(f.mock.log().closes, 1);

    f.manager.close().await.unwrap();
    assert_eq!(f.mock.log().closes, 1);

    let err = f
        .manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::HardwareDisconnected));
}

#[tokio::test]
async fn test_stale_handle_after_reopen() {
    let f = fixture();
    let first = f.manager.open().await.unwrap();
    f.manager.close().await.unwrap();
    let second = f.manager.open().await.unwrap();

    assert_ne!(first, second);
    let err = f
        .manager
        .start_preview(&first, surface(), Resolution::new(640, 480))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::HardwareDisconnected));
    assert_eq!(f.manager.state(), SessionState::Open);
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let f = fixture();
    let mut states = f.manager.subscribe();
    assert_eq!(*states.borrow(), SessionState::Closed);

    let handle = f.manager.open().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Open);

    f.manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap();
    assert_eq!(*states.borrow_and_update(), SessionState::Previewing);
}

#[tokio::test]
async fn test_stalled_preview_configure_times_out() {
    let f = fixture_with(MockBackend::new(), RetryConfig::none());
    let handle = f.manager.open().await.unwrap();

    f.mock.set_stall_configure(true);
    let err = f
        .manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::ConfigurationFailed(_)));
    assert_eq!(f.manager.state(), SessionState::Open);
    let (stalled, _) = f.mock.log().sessions[0].clone();
    assert!(f.mock.log().closed_sessions.contains(&stalled));

    f.mock.set_stall_configure(false);
    f.manager
        .start_preview(&handle, surface(), Resolution::new(640, 480))
        .await
        .unwrap();
    assert_eq!(f.manager.state(), SessionState::Previewing);
}

#[tokio::test]
async fn test_stalled_capture_configure_returns_to_preview() {
    let f = fixture_with(MockBackend::new(), RetryConfig::none());
    let handle = previewing(&f).await;

    f.mock.stall_next_configures(1);
    let err = f
        .manager
        .capture(&handle, f.namer.target(1).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, CameraError::ConfigurationFailed(_)));
    assert_eq!(f.manager.state(), SessionState::Previewing);
    let log = f.mock.log();
    assert!(log.captures.is_empty());
    assert!(log.readers[0].is_closed());
    assert_eq!(f.manager.stats().configure_failures, 1);
}

#[tokio::test]
async fn test_close_after_dropped_capture() {
    let f = fixture();
    let handle = previewing(&f).await;

    f.mock.set_stall_images(true);
    let dropped = tokio::time::timeout(
        Duration::from_millis(100),
        f.manager.capture(&handle, f.namer.target(1).unwrap()),
    )
    .await;
    assert!(dropped.is_err());
    assert_eq!(f.manager.state(), SessionState::Capturing);

    f.manager.close().await.unwrap();

    let log = f.mock.log();
    let (capture_session, _) = log.sessions.last().cloned().unwrap();
    // Recorded only while the device was still open.
    assert!(log.closed_sessions.contains(&capture_session));
    assert!(log.readers[0].is_closed());
    assert!(!f.mock.is_open());
    assert_eq!(f.manager.state(), SessionState::Closed);
    assert!(!f.namer.next_path(1).unwrap().exists());
}

#[tokio::test]
async fn test_late_disconnect_ignored_by_next_handle() {
    let f = fixture_with(MockBackend::new(), RetryConfig::none());
    f.mock.set_late_disconnect(Some(Duration::from_millis(50)));

    let first = f.manager.open().await.unwrap();
    f.manager.close().await.unwrap();
    let second = f.manager.open().await.unwrap();
    assert!(second.generation() > first.generation());

    // The stray event for the first handle has been posted by now.
    tokio::time::sleep(Duration::from_millis(150)).await;
    f.manager.pump_events().await.unwrap();
    assert_eq!(f.manager.state(), SessionState::Open);

    f.manager
        .start_preview(&second, surface(), Resolution::new(640, 480))
        .await
        .unwrap();
    assert_eq!(f.manager.stats().disconnects, 0);
}
