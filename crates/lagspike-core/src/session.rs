//! Detection sessions.
//!
//! A [`LagSpikeMonitor`] bundles the collaborators a session needs and
//! starts sessions on a dedicated `Lag Spike Detector` thread. A
//! [`SessionController`] admits at most one session at a time; the slot is
//! held by a [`SessionGuard`] that the session thread drops on exit, however
//! the loop ended.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, Thread};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::collector::SnapshotCollector;
use crate::detector::{DetectorConfig, FinishReason, PollOutcome, SpikeDetector};
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatRegister;
use crate::host::{HostLifecycle, LogSink, OutputSink, Requester};
use crate::introspect::ThreadIntrospector;
use crate::noise::{IdleWorkerFilter, NoiseFilter};
use crate::report::{SpikeReport, ThreadDump};
use crate::selection::ThreadSelection;

/// Name of the session thread.
pub const DETECTOR_THREAD_NAME: &str = "Lag Spike Detector";

pub const SPIKE_NOTICE: &str = "Lag spike detected. See console/log for more information.";
pub const FINISHED_NOTICE: &str = "Lag spike profiling finished.";
const FAILURE_MESSAGE: &str = "Lag spike detector failed";

/// Admits at most one session.
#[derive(Debug, Default)]
pub struct SessionController {
    active: Arc<Mutex<bool>>,
}

impl SessionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide controller shared by every monitor that does not bring
    /// its own.
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SessionController>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Claim the session slot.
    pub fn try_acquire(&self) -> Result<SessionGuard> {
        let mut active = self.active.lock();
        if *active {
            return Err(Error::SessionActive);
        }
        *active = true;
        Ok(SessionGuard {
            active: Arc::clone(&self.active),
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }
}

/// Holds the session slot; releases it on drop.
#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<Mutex<bool>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        *self.active.lock() = false;
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Finished { reason: FinishReason, reports: usize },
    /// The loop failed or panicked; the cause went to the log sink.
    Faulted { cause: String },
}

/// Handle to a running session thread.
#[derive(Debug)]
pub struct SessionHandle {
    thread: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Cut the current poll or cooldown sleep short.
    pub fn wake(&self) {
        self.thread.thread().unpark();
    }

    /// Wake hook that stays usable after the handle moves into a join.
    #[must_use]
    pub fn waker(&self) -> SessionWaker {
        SessionWaker {
            thread: self.thread.thread().clone(),
        }
    }

    /// Wait for the session to end.
    pub fn join(self) -> Result<SessionOutcome> {
        self.thread
            .join()
            .map_err(|payload| Error::Panicked(panic_message(payload.as_ref())))
    }
}

/// Interrupts a session's sleep from another thread.
#[derive(Debug, Clone)]
pub struct SessionWaker {
    thread: Thread,
}

impl SessionWaker {
    pub fn wake(&self) {
        self.thread.unpark();
    }
}

/// Collaborators and settings shared by every session a monitor starts.
#[derive(Clone)]
pub struct LagSpikeMonitor {
    heartbeat: Arc<HeartbeatRegister>,
    clock: Arc<dyn Clock>,
    collector: SnapshotCollector,
    noise: Arc<dyn NoiseFilter>,
    output: Arc<dyn OutputSink>,
    log: Arc<dyn LogSink>,
    lifecycle: Arc<dyn HostLifecycle>,
    sessions: Arc<SessionController>,
    detector: DetectorConfig,
    include_all: bool,
}

impl std::fmt::Debug for LagSpikeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LagSpikeMonitor")
            .field("collector", &self.collector)
            .field("detector", &self.detector)
            .field("include_all", &self.include_all)
            .finish_non_exhaustive()
    }
}

impl LagSpikeMonitor {
    /// Monitor with the real clock, the default noise filter, the default
    /// selection and detector settings, the process-wide heartbeat register
    /// and the process-wide session slot.
    #[must_use]
    pub fn new(
        introspector: Arc<dyn ThreadIntrospector>,
        output: Arc<dyn OutputSink>,
        log: Arc<dyn LogSink>,
        lifecycle: Arc<dyn HostLifecycle>,
    ) -> Self {
        Self {
            heartbeat: HeartbeatRegister::global(),
            clock: Arc::new(MonotonicClock),
            collector: SnapshotCollector::new(introspector, ThreadSelection::default()),
            noise: Arc::new(IdleWorkerFilter::default()),
            output,
            log,
            lifecycle,
            sessions: SessionController::global(),
            detector: DetectorConfig::default(),
            include_all: false,
        }
    }

    /// Read ticks from `heartbeat` instead of the process-wide register.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Arc<HeartbeatRegister>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the selection policy; `all_threads` also turns on lock detail.
    #[must_use]
    pub fn with_selection(mut self, selection: ThreadSelection) -> Self {
        self.include_all = selection.all_threads;
        self.collector = self.collector.with_selection(selection);
        self
    }

    #[must_use]
    pub fn with_noise_filter(mut self, noise: Arc<dyn NoiseFilter>) -> Self {
        self.noise = noise;
        self
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionController>) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionController> {
        &self.sessions
    }

    /// Start a session lasting `duration_secs` seconds.
    ///
    /// While another session runs, the requester is told so and
    /// [`Error::SessionActive`] is returned; the running session is untouched.
    pub fn start(&self, requester: Option<Requester>, duration_secs: u64) -> Result<SessionHandle> {
        let guard = match self.sessions.try_acquire() {
            Ok(guard) => guard,
            Err(err) => {
                self.output.send_text(requester.as_ref(), &err.to_string());
                return Err(err);
            }
        };

        let detector = SpikeDetector::for_duration(
            &self.detector,
            self.clock.now(),
            Duration::from_secs(duration_secs),
        );
        let session = Session {
            monitor: self.clone(),
            requester: requester.clone(),
            detector,
            reports: 0,
        };

        info!(
            requester = requester.as_ref().map_or("-", |r| r.name.as_str()),
            duration_secs,
            threshold_ms = self.detector.threshold_ms,
            "Lag spike detection started"
        );
        self.output.send_text(
            requester.as_ref(),
            &format!("Started lag spike detection for {duration_secs} seconds."),
        );

        let thread = std::thread::Builder::new()
            .name(DETECTOR_THREAD_NAME.to_string())
            .spawn(move || session.run(guard))
            .map_err(|e| Error::Runtime(format!("failed to spawn detector thread: {e}")))?;
        Ok(SessionHandle { thread })
    }

    /// Collect and build a report right now, outside any session.
    pub fn snapshot(&self, dead_time: Duration) -> Result<SpikeReport> {
        let collection = self.collector.collect(self.include_all)?;
        Ok(SpikeReport {
            dead_time,
            dump: ThreadDump::from_collection(collection, self.noise.as_ref()),
        })
    }
}

struct Session {
    monitor: LagSpikeMonitor,
    requester: Option<Requester>,
    detector: SpikeDetector,
    reports: usize,
}

impl Session {
    fn run(mut self, guard: SessionGuard) -> SessionOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.poll_loop()));
        let outcome = match result {
            Ok(Ok(reason)) => {
                info!(%reason, reports = self.reports, "Lag spike detection finished");
                if let Some(requester) = &self.requester {
                    self.monitor.output.send_text(Some(requester), FINISHED_NOTICE);
                }
                SessionOutcome::Finished {
                    reason,
                    reports: self.reports,
                }
            }
            Ok(Err(err)) => {
                error!(error = %err, "Lag spike detector stopped on error");
                self.monitor.log.error(FAILURE_MESSAGE, Some(&err));
                SessionOutcome::Faulted {
                    cause: err.to_string(),
                }
            }
            Err(payload) => {
                let err = Error::Panicked(panic_message(payload.as_ref()));
                error!(error = %err, "Lag spike detector panicked");
                self.monitor.log.error(FAILURE_MESSAGE, Some(&err));
                SessionOutcome::Faulted {
                    cause: err.to_string(),
                }
            }
        };
        drop(guard);
        outcome
    }

    fn poll_loop(&mut self) -> Result<FinishReason> {
        let interval = self.monitor.detector.poll_interval();
        let cooldown = self.monitor.detector.cooldown();
        loop {
            let now = self.monitor.clock.now();
            let heartbeat = self.monitor.heartbeat.current();
            match self.detector.poll(now, heartbeat, self.monitor.lifecycle.as_ref()) {
                PollOutcome::Continue => self.monitor.clock.sleep(interval),
                PollOutcome::Spike { dead_time } => {
                    self.report(dead_time)?;
                    self.monitor.clock.sleep(cooldown);
                }
                PollOutcome::Finished(reason) => return Ok(reason),
            }
        }
    }

    fn report(&mut self, dead_time: Duration) -> Result<()> {
        warn!(dead_time_ms = dead_time.as_millis() as u64, "Lag spike detected");
        let report = self.monitor.snapshot(dead_time)?;
        self.monitor.log.error(&report.render(), None);
        self.reports += 1;
        // Point the operator at the log only once the report is in it.
        if let Some(requester) = self.requester.as_ref().filter(|r| !r.is_console()) {
            self.monitor.output.send_text(Some(requester), SPIKE_NOTICE);
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
