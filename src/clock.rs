//! Wall-clock abstraction shared by the ID generator, token expiry and the in-memory KV store.
//! Production code uses `SystemClock`; tests drive time explicitly with `ManualClock`.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Block the calling thread for `d`.
    fn sleep(&self, d: Duration) { std::thread::sleep(d) }

    fn now_secs(&self) -> i64 { self.now_millis().div_euclid(1000) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 { chrono::Utc::now().timestamp_millis() }
}

/// A clock that only moves when told to. `sleep` advances it instead of blocking,
/// so code that waits for the clock to catch up terminates immediately.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
    sleeps: AtomicUsize,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self { Self { now_ms: AtomicI64::new(start_ms), sleeps: AtomicUsize::new(0) } }

    pub fn advance(&self, d: Duration) { self.now_ms.fetch_add(d.as_millis() as i64, Ordering::SeqCst); }

    pub fn set_millis(&self, ms: i64) { self.now_ms.store(ms, Ordering::SeqCst); }

    /// Number of times `sleep` was called.
    pub fn sleeps(&self) -> usize { self.sleeps.load(Ordering::SeqCst) }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 { self.now_ms.load(Ordering::SeqCst) }

    fn sleep(&self, d: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_advances_time() {
        let c = ManualClock::new(10_000);
        c.sleep(Duration::from_millis(3));
        assert_eq!(c.now_millis(), 10_003);
        assert_eq!(c.sleeps(), 1);
        assert_eq!(c.now_secs(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
