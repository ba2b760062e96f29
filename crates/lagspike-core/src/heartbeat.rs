//! Heartbeat register written by the monitored main loop.
//!
//! The host calls [`HeartbeatRegister::record_tick`] (or [`HeartbeatRegister::tick`])
//! once per main-loop iteration. The detector reads the slot on every poll.
//! Only the latest value matters, so the slot is a single atomic word with
//! last-writer-wins semantics and no lock.
//!
//! # Integration
//!
//! ```text
//! host main loop ──► heartbeat.tick()
//!                          │
//! detector thread ◄── heartbeat.current()
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::clock::{MonotonicClock, Timestamp};

/// Timestamp of the most recent main-loop tick (0 = never).
#[derive(Debug, Default)]
pub struct HeartbeatRegister {
    last_tick: AtomicU64,
}

impl HeartbeatRegister {
    /// Create a register with no tick recorded.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_tick: AtomicU64::new(0),
        }
    }

    /// Process-wide register for hosts that do not thread their own through.
    /// Monitors built with [`crate::session::LagSpikeMonitor::new`] read it.
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<HeartbeatRegister>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Overwrite the slot with `at`. Never blocks.
    pub fn record_tick(&self, at: Timestamp) {
        self.last_tick.store(at.as_nanos(), Ordering::Release);
    }

    /// Record a tick at the current monotonic time.
    pub fn tick(&self) {
        self.record_tick(MonotonicClock::timestamp());
    }

    /// Latest recorded tick, `None` if the loop has never ticked.
    #[must_use]
    pub fn current(&self) -> Option<Timestamp> {
        match self.last_tick.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(Timestamp::from_nanos(nanos)),
        }
    }
}
