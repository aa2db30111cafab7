//! Deterministic time source, so retry/backoff and timestamping are testable
//! without real sleeps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Test clock: fixed `now()`, records requested sleep durations instead of blocking.
#[derive(Clone, Default)]
pub struct MockClock {
    inner: Arc<Mutex<MockClockState>>,
}

#[derive(Default)]
struct MockClockState {
    now: Option<DateTime<Utc>>,
    sleeps: Vec<Duration>,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        let clock = MockClock::default();
        clock.inner.lock().unwrap().now = Some(now);
        clock
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.inner.lock().unwrap().now = Some(now);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().now.unwrap_or_else(Utc::now)
    }

    fn sleep(&self, d: Duration) {
        self.inner.lock().unwrap().sleeps.push(d);
    }
}
