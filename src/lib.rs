//! Smart Camera Library
//!
//! Camera session lifecycle, live preview and single-shot still capture,
//! with the captured image rotated, encoded losslessly and saved under a
//! persistent sequence number.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! session (open → preview) → capture → storage (rotate, encode, write)
//!     ↑                                      ↓
//!  device events                      media index notification
//! ```
//!
//! # Design Principles
//!
//! - **Single owner**: one session manager holds the hardware handle and
//!   consumes every hardware event
//! - **Bounded waits**: every hardware callback is awaited with a timeout
//! - **Typed failures**: every operation returns a [`CameraError`] variant
//! - **Never overwrite**: images are written with create-new semantics
//!
//! # Example
//!
//! ```no_run
//! use smart_camera::{
//!     device::{MockBackend, PreviewSurface, Resolution, SurfaceId},
//!     permissions::StaticPermissions,
//!     session::CameraSessionManager,
//!     storage::FileNamer,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = CameraSessionManager::builder(
//!     Arc::new(MockBackend::new()),
//!     Arc::new(StaticPermissions::granted()),
//! )
//! .build();
//!
//! let handle = session.open().await?;
//! session
//!     .start_preview(&handle, PreviewSurface::new(SurfaceId(1)), Resolution::new(640, 480))
//!     .await?;
//!
//! let namer = FileNamer::new("/tmp/media");
//! let saved = session.capture(&handle, namer.target(1)?).await?;
//! println!("saved {}", saved.path().display());
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod controller;
pub mod device;
pub mod metrics;
pub mod permissions;
pub mod session;
pub mod storage;

// Re-export commonly used types at crate root
pub use config::FileConfig;
pub use controller::{CameraController, ControllerError, ControllerEvent, Trigger};
pub use device::{CameraBackend, MockBackend};
pub use session::{CameraError, CameraSessionManager, HardwareHandle, SessionState};
pub use storage::{FileNamer, ImagePipeline, PersistedImage};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
