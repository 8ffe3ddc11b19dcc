//! Local time source and the server clock offset estimate.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Source of wall-clock time in milliseconds since epoch.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Local time plus the latest estimate of how far the server clock is ahead of it.
///
/// The offset starts at zero and is only replaced when a snapshot carries a server time;
/// snapshots without one leave the previous estimate in effect.
pub struct ClockService {
    clock: Arc<dyn Clock>,
    offset_ms: AtomicI64,
}

impl ClockService {
    /// Service on `clock` with a zero offset.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Service backed by the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Local time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Local time in whole seconds.
    pub fn now(&self) -> i64 {
        self.now_ms().div_euclid(1_000)
    }

    /// Local time shifted onto the server clock, in milliseconds.
    pub fn corrected_now(&self) -> i64 {
        self.now_ms().saturating_add(self.offset_ms())
    }

    /// Server-corrected time in whole seconds.
    pub fn corrected_now_secs(&self) -> i64 {
        self.corrected_now().div_euclid(1_000)
    }

    /// Server minus local time, in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Recompute the offset against the current local time.
    pub fn update_offset(&self, server_time_ms: i64) -> i64 {
        self.update_offset_at(server_time_ms, self.now_ms())
    }

    /// Recompute the offset against the local time at which the server time was received.
    pub fn update_offset_at(&self, server_time_ms: i64, local_receipt_ms: i64) -> i64 {
        let offset = server_time_ms.saturating_sub(local_receipt_ms);
        self.offset_ms.store(offset, Ordering::Release);
        offset
    }
}
