//! Prometheus metrics for the camera session.
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `smart_camera_session_state` - Current state code (0=closed .. 5=error)
//! - `smart_camera_opens_total` / `smart_camera_open_failures_total`
//! - `smart_camera_previews_started_total`
//! - `smart_camera_configure_failures_total`
//! - `smart_camera_disconnects_total`
//!
//! ## Capture
//! - `smart_camera_captures_succeeded_total` / `smart_camera_captures_failed_total`
//! - `smart_camera_busy_rejections_total`
//! - `smart_camera_bytes_written_total`
//!
//! ## Buffers
//! - `smart_camera_buffers_acquired_total` / `smart_camera_buffers_released_total`
//! - `smart_camera_buffers_outstanding`
//!
//! # Example
//!
//! ```no_run
//! use smart_camera::metrics::MetricsRegistry;
//! # fn stats() -> smart_camera::session::SessionStats { unimplemented!() }
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&stats());
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
