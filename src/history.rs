//! history.rs — bounded in-memory log of heartbeat cycle outcomes.
//!
//! Operators debugging a stale map read this through `/debug/heartbeat`
//! instead of grepping logs. Capacity is capped; old entries are dropped.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleSummary {
    pub ts_unix: u64,
    pub stations_seen: usize,
    pub stations_failed: usize,
    pub applied: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct CycleHistory {
    inner: Mutex<Vec<CycleSummary>>,
    cap: usize,
}

impl CycleHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.min(10_000),
        }
    }

    pub fn push(&self, summary: CycleSummary) {
        let mut v = self.inner.lock().expect("cycle history mutex poisoned");
        v.push(summary);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<CycleSummary> {
        let v = self.inner.lock().expect("cycle history mutex poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
