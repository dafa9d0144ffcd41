//! Circuit breaker for typing-indicator API calls.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Trips after this many consecutive send failures.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 2;

/// Platforms auto-stop typing after this long; a successful start arms a
/// matching TTL so we never model a phantom "typing..." state.
pub const TYPING_TTL: Duration = Duration::from_secs(60);

/// Tracks consecutive typing-indicator failures within a reply cycle.
/// Once tripped, further starts are skipped silently until `reset`.
#[derive(Default)]
pub struct TypingStartGuard {
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl TypingStartGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to send a typing indicator via `send_fn` (returns true on
    /// success). Skipped silently when tripped. On success the failure
    /// counter clears and a TTL timer is armed; on failure the counter
    /// increments and may trip the guard.
    pub fn start<F>(&self, send_fn: F)
    where
        F: FnOnce() -> bool,
    {
        if self.tripped.load(Ordering::Acquire) {
            return;
        }

        if send_fn() {
            self.consecutive_failures.store(0, Ordering::Release);
            // The platform auto-stops after the TTL; the timer only
            // models that, nothing observable happens on expiry.
            tokio::spawn(async {
                tokio::time::sleep(TYPING_TTL).await;
            });
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            if failures >= MAX_CONSECUTIVE_FAILURES {
                self.tripped.store(true, Ordering::Release);
                log::warn!("TypingStartGuard tripped after {failures} consecutive failures");
            }
        }
    }

    /// Clear the counter and trip flag. Called at the start of each reply
    /// cycle.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.tripped.store(false, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn trips_after_two_consecutive_failures() {
        let guard = TypingStartGuard::new();
        guard.start(|| false);
        assert!(!guard.is_tripped());
        assert_eq!(guard.failure_count(), 1);

        guard.start(|| false);
        assert!(guard.is_tripped());
    }

    #[tokio::test]
    async fn tripped_guard_skips_send() {
        let guard = TypingStartGuard::new();
        guard.start(|| false);
        guard.start(|| false);

        let calls = AtomicU32::new(0);
        guard.start(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_clears_failure_count() {
        let guard = TypingStartGuard::new();
        guard.start(|| false);
        guard.start(|| true);
        assert_eq!(guard.failure_count(), 0);
        assert!(!guard.is_tripped());

        // A later single failure does not trip.
        guard.start(|| false);
        assert!(!guard.is_tripped());
    }

    #[tokio::test]
    async fn reset_clears_trip() {
        let guard = TypingStartGuard::new();
        guard.start(|| false);
        guard.start(|| false);
        assert!(guard.is_tripped());

        guard.reset();
        assert!(!guard.is_tripped());
        assert_eq!(guard.failure_count(), 0);

        let calls = AtomicU32::new(0);
        guard.start(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
