//! One-shot cancellable timer used for the completion grace period.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::rlog_trace;

/// Runs a callback once after a delay unless cancelled first.
///
/// Dropping the timer cancels it.
pub struct GraceTimer {
    cancel: CancellationToken,
}

impl GraceTimer {
    /// Spawn the timer on the current tokio runtime.
    pub fn start<F>(delay: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel_clone.cancelled() => {
                    rlog_trace!("GraceTimer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    on_expire();
                }
            }
        });

        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
