//! Session counters.

use super::state::SessionState;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the session owner.
#[derive(Debug, Default)]
pub(super) struct SessionCounters {
    pub(super) opens: AtomicU64,
    pub(super) open_failures: AtomicU64,
    pub(super) previews_started: AtomicU64,
    pub(super) configure_failures: AtomicU64,
    pub(super) captures_succeeded: AtomicU64,
    pub(super) captures_failed: AtomicU64,
    pub(super) busy_rejections: AtomicU64,
    pub(super) buffers_acquired: AtomicU64,
    pub(super) buffers_released: AtomicU64,
    pub(super) disconnects: AtomicU64,
    pub(super) bytes_written: AtomicU64,
}

impl SessionCounters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self, state: SessionState) -> SessionStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SessionStats {
            state,
            opens: get(&self.opens),
            open_failures: get(&self.open_failures),
            previews_started: get(&self.previews_started),
            configure_failures: get(&self.configure_failures),
            captures_succeeded: get(&self.captures_succeeded),
            captures_failed: get(&self.captures_failed),
            busy_rejections: get(&self.busy_rejections),
            buffers_acquired: get(&self.buffers_acquired),
            buffers_released: get(&self.buffers_released),
            disconnects: get(&self.disconnects),
            bytes_written: get(&self.bytes_written),
        }
    }
}

/// A snapshot of session activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// State at the time of the snapshot.
    pub state: SessionState,
    /// Successful device opens.
    pub opens: u64,
    /// Opens that failed after all retries.
    pub open_failures: u64,
    /// Preview streams started.
    pub previews_started: u64,
    /// Session configurations that failed or timed out.
    pub configure_failures: u64,
    /// Captures that produced a saved image.
    pub captures_succeeded: u64,
    /// Captures that returned an error (excluding busy rejections).
    pub captures_failed: u64,
    /// Capture calls rejected because one was in flight.
    pub busy_rejections: u64,
    /// Image buffers taken from readers.
    pub buffers_acquired: u64,
    /// Image buffers released back.
    pub buffers_released: u64,
    /// Handles lost to disconnects, device errors or revoked permissions.
    pub disconnects: u64,
    /// Bytes of encoded images written.
    pub bytes_written: u64,
}
