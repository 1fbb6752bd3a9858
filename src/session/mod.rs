//! Camera session lifecycle.
//!
//! The session owner holds the hardware handle and serializes everything
//! that happens to it:
//!
//! ```text
//! Closed → Opening → Open → Previewing ⇄ Capturing
//!              ↘       ↘        ↘           ↘
//!                          Error → Closed
//! ```
//!
//! Operations are async and every hardware wait is bounded by a timeout
//! from [`SessionConfig`].

mod capture;
mod error;
mod manager;
mod preview;
mod retry;
mod state;
mod stats;

#[cfg(test)]
mod tests;

pub use error::CameraError;
pub use manager::{CameraSessionManager, HardwareHandle, SessionBuilder, SessionConfig};
pub use state::{SessionState, StateMachine};
pub use stats::SessionStats;
