// SPDX-License-Identifier: MIT

//! Clock abstraction so the runner and state store never call
//! `SystemTime::now()` directly, keeping lock-TTL and timestamp logic
//! deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now", injected wherever lock TTLs or record timestamps
/// are computed.
pub trait Clock: Send + Sync {
    /// Current time as epoch seconds (lock TTL comparisons use this unit).
    fn epoch_seconds(&self) -> u64;

    /// Current time as epoch milliseconds (record `updated_at` fields).
    fn epoch_ms(&self) -> u64 {
        self.epoch_seconds() * 1000
    }
}

/// Production clock backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Deterministic clock for tests. Starts at a fixed instant and only
/// advances when `advance` is called, so lock-contention and
/// resume-ordering tests don't race real wall-clock time.
#[derive(Debug, Clone)]
pub struct FakeClock {
    seconds: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_epoch_seconds: u64) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(start_epoch_seconds)),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl Clock for FakeClock {
    fn epoch_seconds(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }
}
