//! End-to-end detection sessions driven by a scripted clock.
//!
//! The clock advances instantly on every sleep and ticks the heartbeat
//! unless the current time falls inside a scripted stall window, so a whole
//! session runs in milliseconds of wall time.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lagspike_core::clock::{Clock, MonotonicClock, Timestamp};
use lagspike_core::detector::{DetectorConfig, FinishReason};
use lagspike_core::error::{Error, Result};
use lagspike_core::heartbeat::HeartbeatRegister;
use lagspike_core::host::{FlagLifecycle, LogSink, OutputSink, Requester};
use lagspike_core::introspect::{StaticIntrospector, ThreadIntrospector};
use lagspike_core::selection::ThreadSelection;
use lagspike_core::session::{
    FINISHED_NOTICE, LagSpikeMonitor, SPIKE_NOTICE, SessionController, SessionOutcome,
};
use lagspike_core::snapshot::{LockInfo, LockOwner, ThreadId, ThreadSnapshot, ThreadState};
use parking_lot::Mutex;

const MS: u64 = 1_000_000;
const START_MS: u64 = 1_000;

// =========================================================================
// Fixtures
// =========================================================================

struct ScriptedClock {
    now: AtomicU64,
    heartbeat: Arc<HeartbeatRegister>,
    stalls: Vec<Range<u64>>,
    hold: AtomicBool,
}

impl ScriptedClock {
    fn new(heartbeat: Arc<HeartbeatRegister>, stalls: Vec<Range<u64>>) -> Arc<Self> {
        heartbeat.record_tick(Timestamp::from_nanos(START_MS * MS));
        Arc::new(Self {
            now: AtomicU64::new(START_MS * MS),
            heartbeat,
            stalls,
            hold: AtomicBool::new(false),
        })
    }

    fn stalled_at(&self, nanos: u64) -> bool {
        let ms = nanos / MS;
        self.stalls.iter().any(|r| r.contains(&ms))
    }
}

impl Clock for ScriptedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        while self.hold.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let step = duration.as_nanos() as u64;
        let now = self.now.fetch_add(step, Ordering::SeqCst) + step;
        if !self.stalled_at(now) {
            self.heartbeat.record_tick(Timestamp::from_nanos(now));
        }
    }
}

#[derive(Default)]
struct RecordingOutput {
    messages: Mutex<Vec<(Option<String>, String)>>,
}

impl RecordingOutput {
    fn texts_for(&self, name: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to.as_deref() == Some(name))
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn all_texts(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(_, t)| t.clone()).collect()
    }
}

impl OutputSink for RecordingOutput {
    fn send_text(&self, requester: Option<&Requester>, message: &str) {
        self.messages
            .lock()
            .push((requester.map(|r| r.name.clone()), message.to_string()));
    }
}

#[derive(Default)]
struct RecordingLog {
    entries: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingLog {
    fn reports(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, cause)| cause.is_none())
            .map(|(m, _)| m.clone())
            .collect()
    }

    fn failures(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(m, cause)| Some((m.clone(), cause.clone()?)))
            .collect()
    }
}

impl LogSink for RecordingLog {
    fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.entries
            .lock()
            .push((message.to_string(), cause.map(ToString::to_string)));
    }
}

struct FailingIntrospector;

impl ThreadIntrospector for FailingIntrospector {
    fn find_deadlocked_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(Vec::new())
    }

    fn thread_info(&self, _ids: &[ThreadId]) -> Result<Vec<ThreadSnapshot>> {
        Ok(Vec::new())
    }

    fn dump_all_threads(&self, _lock_detail: bool) -> Result<Vec<ThreadSnapshot>> {
        Err(Error::Introspection("task directory vanished".into()))
    }
}

struct PanickingIntrospector;

impl ThreadIntrospector for PanickingIntrospector {
    fn find_deadlocked_threads(&self) -> Result<Vec<ThreadId>> {
        panic!("introspection backend exploded");
    }

    fn thread_info(&self, _ids: &[ThreadId]) -> Result<Vec<ThreadSnapshot>> {
        Ok(Vec::new())
    }

    fn dump_all_threads(&self, _lock_detail: bool) -> Result<Vec<ThreadSnapshot>> {
        Ok(Vec::new())
    }
}

fn process_threads() -> Vec<ThreadSnapshot> {
    vec![
        ThreadSnapshot::new(ThreadId(1), "Server thread")
            .with_state(ThreadState::Blocked)
            .waiting_on(
                LockInfo::at("parking_lot::Mutex", 0x7f00),
                Some(LockOwner {
                    name: "io-1".into(),
                    id: ThreadId(2),
                }),
            )
            .with_frames(["server::world::World::save", "server::tick"]),
        ThreadSnapshot::new(ThreadId(2), "io-1").with_frames(["net::Listener::accept"]),
        ThreadSnapshot::new(ThreadId(3), "pool-1-worker-1")
            .with_state(ThreadState::Waiting)
            .with_frames(["std::sync::mpmc::Receiver<T>::recv", "pool::Worker::run"]),
    ]
}

struct Harness {
    monitor: LagSpikeMonitor,
    clock: Arc<ScriptedClock>,
    output: Arc<RecordingOutput>,
    log: Arc<RecordingLog>,
    lifecycle: Arc<FlagLifecycle>,
    sessions: Arc<SessionController>,
}

fn harness(introspector: Arc<dyn ThreadIntrospector>, stalls: Vec<Range<u64>>) -> Harness {
    let heartbeat = Arc::new(HeartbeatRegister::new());
    let clock = ScriptedClock::new(Arc::clone(&heartbeat), stalls);
    let output = Arc::new(RecordingOutput::default());
    let log = Arc::new(RecordingLog::default());
    let lifecycle = Arc::new(FlagLifecycle::running());
    let sessions = Arc::new(SessionController::new());
    let monitor = LagSpikeMonitor::new(introspector, output.clone(), log.clone(), lifecycle.clone())
        .with_heartbeat(heartbeat)
        .with_clock(clock.clone())
        .with_sessions(Arc::clone(&sessions))
        .with_detector(DetectorConfig {
            threshold_ms: 200,
            cooldown_ms: 100,
        });
    Harness {
        monitor,
        clock,
        output,
        log,
        lifecycle,
        sessions,
    }
}

fn static_threads() -> Arc<dyn ThreadIntrospector> {
    Arc::new(StaticIntrospector::new(process_threads()))
}

// =========================================================================
// Sessions
// =========================================================================

#[test]
fn healthy_session_finishes_without_reports() {
    let h = harness(static_threads(), Vec::new());
    let handle = h.monitor.start(Some(Requester::interactive("ops")), 2).unwrap();
    let outcome = handle.join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::DurationElapsed,
            reports: 0
        }
    );
    assert!(h.log.reports().is_empty());
    assert_eq!(
        h.output.texts_for("ops"),
        ["Started lag spike detection for 2 seconds.", FINISHED_NOTICE]
    );
    assert!(!h.sessions.is_active());
}

#[test]
fn sustained_stall_produces_one_report() {
    let h = harness(static_threads(), vec![1_500..2_500]);
    let handle = h.monitor.start(Some(Requester::interactive("ops")), 3).unwrap();
    let outcome = handle.join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::DurationElapsed,
            reports: 1
        }
    );
    let reports = h.log.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.starts_with("The server appears to have lag spiked.\nLast tick 0."));
    assert!(report.contains(
        "\"Server thread\" BLOCKED on parking_lot::Mutex@7f00 owned by \"io-1\" Id=2\n"
    ));
    assert!(!report.contains("io-1\" RUNNABLE"));
    assert!(h.output.texts_for("ops").contains(&SPIKE_NOTICE.to_string()));
}

#[test]
fn recovery_then_new_stall_reports_twice() {
    let h = harness(static_threads(), vec![1_500..2_000, 2_500..3_000]);
    let handle = h.monitor.start(None, 4).unwrap();
    let outcome = handle.join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::DurationElapsed,
            reports: 2
        }
    );
    assert_eq!(h.log.reports().len(), 2);
    // Headless sessions get neither the spike notice nor the finished notice.
    let texts = h.output.all_texts();
    assert!(!texts.contains(&SPIKE_NOTICE.to_string()));
    assert!(!texts.contains(&FINISHED_NOTICE.to_string()));
}

#[test]
fn all_threads_report_groups_and_filters_noise() {
    let h = harness(static_threads(), vec![1_500..2_500]);
    let monitor = h.monitor.clone().with_selection(ThreadSelection {
        all_threads: true,
        ..ThreadSelection::default()
    });
    monitor.start(None, 3).unwrap().join().unwrap();

    let reports = h.log.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.contains("\"io-1\" RUNNABLE\n\tat net::Listener::accept\n"));
    assert!(report.contains("\"Server thread\" BLOCKED"));
    assert!(!report.contains("pool-1-worker-1"));
    let io = report.find("\"io-1\"").unwrap();
    let server = report.find("\"Server thread\"").unwrap();
    assert!(io < server);
}

#[test]
fn console_requester_gets_no_spike_notice() {
    let h = harness(static_threads(), vec![1_500..2_500]);
    let handle = h.monitor.start(Some(Requester::console()), 3).unwrap();
    handle.join().unwrap();

    assert_eq!(h.log.reports().len(), 1);
    let texts = h.output.texts_for("console");
    assert!(!texts.contains(&SPIKE_NOTICE.to_string()));
    assert_eq!(texts.last().map(String::as_str), Some(FINISHED_NOTICE));
}

#[test]
fn second_start_is_rejected_while_active() {
    let h = harness(static_threads(), Vec::new());
    h.clock.hold.store(true, Ordering::SeqCst);
    let first = h.monitor.start(Some(Requester::interactive("first")), 2).unwrap();

    let second = h.monitor.start(Some(Requester::interactive("second")), 5);
    assert!(matches!(second, Err(Error::SessionActive)));
    assert_eq!(
        h.output.texts_for("second"),
        ["Lag spike profiling is already in progress"]
    );
    assert!(h.sessions.is_active());

    h.clock.hold.store(false, Ordering::SeqCst);
    first.wake();
    let outcome = first.join().unwrap();
    assert!(matches!(outcome, SessionOutcome::Finished { .. }));
    assert_eq!(h.output.texts_for("first").last().map(String::as_str), Some(FINISHED_NOTICE));
    assert!(!h.sessions.is_active());

    // Slot is free again.
    h.monitor.start(None, 1).unwrap().join().unwrap();
}

#[test]
fn stopped_host_ends_session_without_report() {
    let h = harness(static_threads(), vec![1_500..5_000]);
    h.lifecycle.stop();
    let outcome = h.monitor.start(Some(Requester::interactive("ops")), 10).unwrap().join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::HostStopped,
            reports: 0
        }
    );
    assert!(h.log.reports().is_empty());
    assert!(h.clock.now() < Timestamp::from_nanos(3_000 * MS));
}

#[test]
fn deadlock_report_takes_priority() {
    let intro = StaticIntrospector::new(process_threads()).with_deadlock(vec![ThreadId(1), ThreadId(3)]);
    let h = harness(Arc::new(intro), vec![1_500..2_500]);
    h.monitor.start(None, 3).unwrap().join().unwrap();

    let reports = h.log.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.contains("Definitely deadlocked: \n\"Server thread\" Id=1 BLOCKED"));
    // Idle-worker noise is not filtered in deadlock mode.
    assert!(report.contains("\"pool-1-worker-1\" Id=3 WAITING"));
    assert!(!report.contains("io-1\" Id=2"));
}

#[test]
fn introspection_error_faults_session() {
    let h = harness(Arc::new(FailingIntrospector), vec![1_500..2_500]);
    let outcome = h.monitor.start(Some(Requester::interactive("ops")), 3).unwrap().join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Faulted {
            cause: "Introspection error: task directory vanished".into()
        }
    );
    let failures = h.log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "Lag spike detector failed");
    assert!(failures[0].1.contains("task directory vanished"));
    let texts = h.output.texts_for("ops");
    // No report reached the log, so the operator is not pointed at it.
    assert!(!texts.contains(&SPIKE_NOTICE.to_string()));
    assert!(!texts.contains(&FINISHED_NOTICE.to_string()));
    assert!(!h.sessions.is_active());
}

#[test]
fn panic_in_loop_is_contained() {
    let h = harness(Arc::new(PanickingIntrospector), vec![1_500..2_500]);
    let outcome = h.monitor.start(Some(Requester::interactive("ops")), 3).unwrap().join().unwrap();

    match outcome {
        SessionOutcome::Faulted { cause } => assert!(cause.contains("introspection backend exploded")),
        other => panic!("expected fault, got {other:?}"),
    }
    assert_eq!(h.log.failures().len(), 1);
    assert!(!h.output.texts_for("ops").contains(&FINISHED_NOTICE.to_string()));
    assert!(!h.sessions.is_active());
}

/// Log sink that records the report, then marks the host as shut down.
struct StopHostOnReport {
    log: Arc<RecordingLog>,
    output: Arc<RecordingOutput>,
    lifecycle: Arc<FlagLifecycle>,
    notice_before_report: AtomicBool,
}

impl LogSink for StopHostOnReport {
    fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        if self.output.all_texts().contains(&SPIKE_NOTICE.to_string()) {
            self.notice_before_report.store(true, Ordering::SeqCst);
        }
        self.log.error(message, cause);
        self.lifecycle.stop();
    }
}

#[test]
fn host_stop_ends_latched_session() {
    let heartbeat = Arc::new(HeartbeatRegister::new());
    // The main loop never ticks again after 1.5 s.
    let clock = ScriptedClock::new(Arc::clone(&heartbeat), vec![1_500..u64::MAX]);
    let output = Arc::new(RecordingOutput::default());
    let lifecycle = Arc::new(FlagLifecycle::running());
    let sink = Arc::new(StopHostOnReport {
        log: Arc::new(RecordingLog::default()),
        output: Arc::clone(&output),
        lifecycle: Arc::clone(&lifecycle),
        notice_before_report: AtomicBool::new(false),
    });
    let monitor = LagSpikeMonitor::new(static_threads(), output.clone(), sink.clone(), lifecycle)
        .with_heartbeat(heartbeat)
        .with_clock(clock.clone())
        .with_sessions(Arc::new(SessionController::new()))
        .with_detector(DetectorConfig {
            threshold_ms: 200,
            cooldown_ms: 100,
        });

    let outcome = monitor.start(Some(Requester::interactive("ops")), 600).unwrap().join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::HostStopped,
            reports: 1
        }
    );
    assert_eq!(sink.log.reports().len(), 1);
    assert!(clock.now() < Timestamp::from_nanos(5_000 * MS));
    // The spike notice follows the report.
    assert!(!sink.notice_before_report.load(Ordering::SeqCst));
    assert!(output.texts_for("ops").contains(&SPIKE_NOTICE.to_string()));
}

#[test]
fn default_monitor_reads_global_heartbeat() {
    let clock = ScriptedClock::new(HeartbeatRegister::global(), vec![1_500..2_500]);
    let log = Arc::new(RecordingLog::default());
    let monitor = LagSpikeMonitor::new(
        static_threads(),
        Arc::new(RecordingOutput::default()),
        log.clone(),
        Arc::new(FlagLifecycle::running()),
    )
    .with_clock(clock.clone())
    .with_sessions(Arc::new(SessionController::new()))
    .with_detector(DetectorConfig {
        threshold_ms: 200,
        cooldown_ms: 100,
    });

    let outcome = monitor.start(None, 3).unwrap().join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::DurationElapsed,
            reports: 1
        }
    );
    assert_eq!(log.reports().len(), 1);
    assert!(HeartbeatRegister::global().current() >= Some(Timestamp::from_nanos(2_500 * MS)));
}

#[test]
fn waker_cuts_cooldown_short_on_shutdown() {
    let heartbeat = Arc::new(HeartbeatRegister::new());
    heartbeat.record_tick(MonotonicClock::timestamp());
    let log = Arc::new(RecordingLog::default());
    let lifecycle = Arc::new(FlagLifecycle::running());
    let monitor = LagSpikeMonitor::new(
        static_threads(),
        Arc::new(RecordingOutput::default()),
        log.clone(),
        lifecycle.clone(),
    )
    .with_heartbeat(heartbeat)
    .with_sessions(Arc::new(SessionController::new()))
    .with_detector(DetectorConfig {
        threshold_ms: 1,
        cooldown_ms: 60_000,
    });

    let started = Instant::now();
    let handle = monitor.start(None, 600).unwrap();
    let waker = handle.waker();

    let deadline = Instant::now() + Duration::from_secs(10);
    while log.reports().is_empty() {
        assert!(Instant::now() < deadline, "no report within 10s");
        std::thread::sleep(Duration::from_millis(5));
    }

    lifecycle.stop();
    waker.wake();
    let outcome = handle.join().unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Finished {
            reason: FinishReason::HostStopped,
            reports: 1
        }
    );
    assert!(started.elapsed() < Duration::from_secs(30));
}
