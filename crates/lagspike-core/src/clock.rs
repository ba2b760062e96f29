//! Monotonic time source for heartbeats and the detector.
//!
//! Every timestamp in lagspike is a [`Timestamp`]: nanoseconds since a
//! process-wide anchor taken the first time the real clock is read. The
//! [`Clock`] trait lets tests drive the detector without real sleeps.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Nanosecond-resolution monotonic instant.
///
/// Zero is reserved to mean "never recorded"; [`MonotonicClock`] never
/// returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

/// Source of "now" plus the loop's timed wait.
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Timestamp;

    /// Block the calling thread for up to `duration`.
    ///
    /// Waking early is allowed; callers re-check time after every wait.
    fn sleep(&self, duration: Duration);
}

/// Real clock backed by [`Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Current time on the process-wide monotonic timeline.
    #[must_use]
    pub fn timestamp() -> Timestamp {
        let anchor = ANCHOR.get_or_init(Instant::now);
        let nanos = u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Timestamp(nanos.saturating_add(1))
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Self::timestamp()
    }

    fn sleep(&self, duration: Duration) {
        // park_timeout doubles as the interrupt: an unpark just ends the wait.
        std::thread::park_timeout(duration);
    }
}

/// Hand-driven clock for tests; `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_add(nanos))
            });
    }

    pub fn set(&self, at: Timestamp) {
        self.now.store(at.as_nanos(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
