//! Injectable time source.
//!
//! The pool stamps circuits with Unix epoch seconds. Health evaluation and
//! cleanup take "now" from a `Clock` so tests can drive expiry without
//! sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in Unix epoch seconds.
pub trait Clock: Send + Sync {
    fn now_ts(&self) -> i64;
}

/// Wall-clock time via chrono.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ts(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(start),
        })
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ts(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
