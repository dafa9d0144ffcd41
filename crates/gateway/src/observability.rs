//! Request counters and a recent-log ring buffer, owned by the server
//! and injectable in tests.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const MAX_LOG_ENTRIES: usize = 1000;

pub struct GatewayObservability {
    start_time: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    logs: Mutex<VecDeque<Value>>,
}

impl Default for GatewayObservability {
    fn default() -> Self {
        GatewayObservability {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            logs: Mutex::new(VecDeque::new()),
        }
    }
}

impl GatewayObservability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn add_log(&self, level: &str, message: &str) {
        let mut logs = self.logs.lock();
        logs.push_back(json!({
            "timestamp": krill::timestamp_ms(),
            "level": level,
            "message": message,
        }));
        while logs.len() > MAX_LOG_ENTRIES {
            logs.pop_front();
        }
    }

    /// The most recent `n` log entries, oldest first.
    pub fn recent_logs(&self, n: usize) -> Value {
        let logs = self.logs.lock();
        let start = logs.len().saturating_sub(n);
        Value::Array(logs.iter().skip(start).cloned().collect())
    }

    pub fn metrics(&self) -> Value {
        json!({
            "uptime_seconds": self.uptime_seconds(),
            "total_requests": self.total_requests(),
            "total_errors": self.total_errors(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let obs = GatewayObservability::new();
        obs.record_request();
        obs.record_request();
        obs.record_error();
        assert_eq!(obs.total_requests(), 2);
        assert_eq!(obs.total_errors(), 1);
    }

    #[test]
    fn log_ring_keeps_most_recent() {
        let obs = GatewayObservability::new();
        for i in 0..1100 {
            obs.add_log("info", &format!("entry {i}"));
        }
        let recent = obs.recent_logs(10);
        let entries = recent.as_array().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[9]["message"], "entry 1099");

        let all = obs.recent_logs(5000);
        assert_eq!(all.as_array().unwrap().len(), 1000);
    }
}
