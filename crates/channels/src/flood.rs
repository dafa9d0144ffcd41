//! Per-connection unauthorized-request flood tracking.

use std::sync::atomic::{AtomicU32, Ordering};

/// Counts consecutive unauthorized requests on one connection and says
/// when the connection should be closed. Logging is sampled so an active
/// flood cannot spam the log.
pub struct UnauthorizedFloodGuard {
    threshold: u32,
    rejection_count: AtomicU32,
}

impl UnauthorizedFloodGuard {
    pub const DEFAULT_THRESHOLD: u32 = 50;

    /// Log the first rejection and every Nth afterwards.
    pub const LOG_SAMPLE_INTERVAL: u32 = 10;

    pub fn new(threshold: u32) -> Self {
        UnauthorizedFloodGuard {
            threshold,
            rejection_count: AtomicU32::new(0),
        }
    }

    /// Record one unauthorized request. Returns true when the connection
    /// should be closed (threshold reached).
    pub fn record_rejection(&self) -> bool {
        let count = self.rejection_count.fetch_add(1, Ordering::AcqRel) + 1;

        if count == 1 || count % Self::LOG_SAMPLE_INTERVAL == 0 {
            log::warn!("FloodGuard: {count} consecutive unauthorized requests");
        }

        count >= self.threshold
    }

    /// Clear the counter, e.g. after a successful authorization.
    pub fn reset(&self) {
        self.rejection_count.store(0, Ordering::Release);
    }

    pub fn count(&self) -> u32 {
        self.rejection_count.load(Ordering::Acquire)
    }

    pub fn is_flooded(&self) -> bool {
        self.count() >= self.threshold
    }
}

impl Default for UnauthorizedFloodGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_exactly_at_threshold() {
        let guard = UnauthorizedFloodGuard::new(3);
        assert!(!guard.record_rejection());
        assert!(!guard.record_rejection());
        assert!(guard.record_rejection());
        assert!(guard.is_flooded());
    }

    #[test]
    fn reset_clears_count() {
        let guard = UnauthorizedFloodGuard::new(2);
        guard.record_rejection();
        guard.reset();
        assert_eq!(guard.count(), 0);
        assert!(!guard.record_rejection());
    }

    #[test]
    fn default_threshold_is_fifty() {
        let guard = UnauthorizedFloodGuard::default();
        for _ in 0..49 {
            assert!(!guard.is_flooded());
            guard.record_rejection();
        }
        assert!(!guard.is_flooded());
        guard.record_rejection();
        assert!(guard.is_flooded());
    }
}
