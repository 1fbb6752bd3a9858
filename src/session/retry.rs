//! Bounded backoff for transient session failures.

use super::error::CameraError;
use crate::config::RetryConfig;

/// Tracks attempts of one retried operation.
pub(super) struct Backoff<'a> {
    policy: &'a RetryConfig,
    operation: &'static str,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    pub(super) fn new(policy: &'a RetryConfig, operation: &'static str) -> Self {
        Self {
            policy,
            operation,
            attempt: 1,
        }
    }

    /// Sleeps and returns true if `error` should be retried.
    pub(super) async fn retry(&mut self, error: &CameraError) -> bool {
        if !error.is_transient() || self.attempt >= self.policy.max_attempts {
            return false;
        }
        let delay = self.policy.backoff(self.attempt);
        tracing::warn!(
            operation = self.operation,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        self.attempt += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        let mut backoff = Backoff::new(&policy, "test");
        let error = CameraError::DeviceUnavailable("busy".into());

        assert!(backoff.retry(&error).await);
        assert!(backoff.retry(&error).await);
        assert!(!backoff.retry(&error).await);
    }

    #[tokio::test]
    async fn test_never_retries_terminal_errors() {
        let policy = RetryConfig::default();
        let mut backoff = Backoff::new(&policy, "test");
        assert!(!backoff.retry(&CameraError::HardwareDisconnected).await);
        assert!(!backoff.retry(&CameraError::Busy).await);
    }
}
