//! Lock-cycle detection over `parking_lot` locks.
//!
//! Only available with the `deadlock-detection` feature, which turns on
//! `parking_lot`'s own bookkeeping. Without it [`DeadlockProbe::check`]
//! always reports no cycle.
//!
//! `parking_lot` hands out each cycle exactly once, so the probe keeps the
//! last detected cycle around for [`DeadlockProbe::detail`].

use parking_lot::Mutex;

use crate::snapshot::{ThreadId, ThreadSnapshot};

#[derive(Debug, Default)]
pub struct DeadlockProbe {
    last_cycle: Mutex<Vec<ThreadSnapshot>>,
}

impl DeadlockProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cycle detection is compiled in.
    #[must_use]
    pub const fn enabled() -> bool {
        cfg!(feature = "deadlock-detection")
    }

    /// Ids of threads in newly detected cycles; empty when none.
    pub fn check(&self) -> Vec<ThreadId> {
        let found = detect();
        if found.is_empty() {
            return Vec::new();
        }
        tracing::warn!(threads = found.len(), "parking_lot reported a lock cycle");
        let ids = found.iter().map(|t| t.id).collect();
        *self.last_cycle.lock() = found;
        ids
    }

    /// Snapshots of the last detected cycle restricted to `ids`.
    #[must_use]
    pub fn detail(&self, ids: &[ThreadId]) -> Vec<ThreadSnapshot> {
        self.last_cycle
            .lock()
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect()
    }
}

#[cfg(feature = "deadlock-detection")]
fn detect() -> Vec<ThreadSnapshot> {
    use crate::snapshot::{LockInfo, ThreadState};

    parking_lot::deadlock::check_deadlock()
        .into_iter()
        .enumerate()
        .flat_map(|(cycle, threads)| {
            threads.into_iter().map(move |thread| {
                let id = thread.thread_id() as u64;
                ThreadSnapshot::new(ThreadId(id), format!("parking_lot thread {id:#x}"))
                    .with_state(ThreadState::Blocked)
                    .waiting_on(LockInfo::new(format!("parking_lot lock cycle #{cycle}")), None)
                    .with_frames(frames_of(thread.backtrace()))
            })
        })
        .collect()
}

#[cfg(not(feature = "deadlock-detection"))]
fn detect() -> Vec<ThreadSnapshot> {
    Vec::new()
}

#[cfg(feature = "deadlock-detection")]
fn frames_of(backtrace: &backtrace::Backtrace) -> Vec<crate::snapshot::StackFrame> {
    use crate::snapshot::StackFrame;

    backtrace
        .frames()
        .iter()
        .flat_map(backtrace::BacktraceFrame::symbols)
        .filter_map(|symbol| {
            let name = format!("{:#}", symbol.name()?);
            Some(match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(line)) => {
                    StackFrame::with_location(name, format!("{}:{line}", file.display()))
                }
                _ => StackFrame::new(name),
            })
        })
        .collect()
}
