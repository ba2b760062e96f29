//! Stall detection state machine.
//!
//! [`SpikeDetector`] is pure: it is fed "now", the latest heartbeat and the
//! host lifecycle, and answers with a [`PollOutcome`]. The session loop owns
//! the sleeping and the reporting.
//!
//! ```text
//! Idle ──poll──► Polling ──stall ≥ threshold──► SpikeLatched
//!                  ▲  │                             │
//!                  │  └─── dead time < threshold ◄──┘
//!                  │
//!  any state ──past stop time / host stopped──► Finished
//! ```
//!
//! The host is asked `is_running` and `has_stopped` when a new stall is
//! confirmed. While latched on a stall only `has_stopped` is checked.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Timestamp;
use crate::host::HostLifecycle;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Detector tuning, the `[detector]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Dead time (ms) at which the main loop counts as stalled.
    pub threshold_ms: u64,
    /// Pause (ms) after each report before polling resumes.
    pub cooldown_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 200,
            cooldown_ms: 15_000,
        }
    }
}

impl DetectorConfig {
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        poll_interval(self.threshold())
    }
}

/// Sleep between polls: a sixth of the threshold, clamped to 1 ms..=1 s.
#[must_use]
pub fn poll_interval(threshold: Duration) -> Duration {
    (threshold / 6).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Idle,
    Polling,
    /// A stall was reported; no further report until the loop recovers.
    SpikeLatched,
    Finished(FinishReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    DurationElapsed,
    HostStopped,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DurationElapsed => write!(f, "duration elapsed"),
            Self::HostStopped => write!(f, "host stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to do; sleep one poll interval.
    Continue,
    /// New stall confirmed; report it, then cool down.
    Spike { dead_time: Duration },
    Finished(FinishReason),
}

/// One session's detector.
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    threshold: Duration,
    stop_at: Timestamp,
    state: DetectorState,
}

impl SpikeDetector {
    /// Detector that stays live until `stop_at`.
    #[must_use]
    pub fn new(config: &DetectorConfig, stop_at: Timestamp) -> Self {
        Self {
            threshold: config.threshold(),
            stop_at,
            state: DetectorState::Idle,
        }
    }

    /// Detector for a session of `duration` starting at `start`.
    #[must_use]
    pub fn for_duration(config: &DetectorConfig, start: Timestamp, duration: Duration) -> Self {
        Self::new(config, start.saturating_add(duration))
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    #[must_use]
    pub const fn stop_at(&self) -> Timestamp {
        self.stop_at
    }

    /// Evaluate one poll. `heartbeat` of `None` counts as a tick at `now`.
    pub fn poll(
        &mut self,
        now: Timestamp,
        heartbeat: Option<Timestamp>,
        host: &dyn HostLifecycle,
    ) -> PollOutcome {
        if let DetectorState::Finished(reason) = self.state {
            return PollOutcome::Finished(reason);
        }

        if now > self.stop_at {
            return self.finish(FinishReason::DurationElapsed);
        }

        let dead_time = now.saturating_duration_since(heartbeat.unwrap_or(now));
        if dead_time < self.threshold {
            if self.state == DetectorState::SpikeLatched {
                debug!(dead_time_ms = dead_time.as_millis() as u64, "Main loop recovered");
            }
            self.state = DetectorState::Polling;
            return PollOutcome::Continue;
        }

        if self.state == DetectorState::SpikeLatched {
            if host.has_stopped() {
                return self.finish(FinishReason::HostStopped);
            }
            return PollOutcome::Continue;
        }

        if !host.is_running() || host.has_stopped() {
            return self.finish(FinishReason::HostStopped);
        }

        debug!(
            dead_time_ms = dead_time.as_millis() as u64,
            threshold_ms = self.threshold.as_millis() as u64,
            "Stall confirmed"
        );
        self.state = DetectorState::SpikeLatched;
        PollOutcome::Spike { dead_time }
    }

    fn finish(&mut self, reason: FinishReason) -> PollOutcome {
        self.state = DetectorState::Finished(reason);
        PollOutcome::Finished(reason)
    }
}
