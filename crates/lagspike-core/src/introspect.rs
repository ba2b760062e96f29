//! Thread introspection backends.
//!
//! The collector talks to the process through [`ThreadIntrospector`], so the
//! whole pipeline runs unchanged against the Linux procfs backend
//! ([`crate::procfs::ProcfsIntrospector`]) or a canned [`StaticIntrospector`]
//! in tests.

use parking_lot::Mutex;

use crate::error::Result;
use crate::snapshot::{ThreadId, ThreadSnapshot};

/// Read-only view of the threads of the current process.
pub trait ThreadIntrospector: Send + Sync {
    /// Threads that form a lock cycle right now; empty when none.
    fn find_deadlocked_threads(&self) -> Result<Vec<ThreadId>>;

    /// Full-detail snapshots (owners, monitors, synchronizers) for `ids`.
    ///
    /// Threads that exited since detection are skipped.
    fn thread_info(&self, ids: &[ThreadId]) -> Result<Vec<ThreadSnapshot>>;

    /// Snapshot every live thread. Lock-ownership detail is only gathered
    /// when `lock_detail` is set.
    fn dump_all_threads(&self, lock_detail: bool) -> Result<Vec<ThreadSnapshot>>;
}

/// Introspector returning a fixed thread set; the building block for tests
/// and for hosts that assemble snapshots themselves.
#[derive(Debug, Default)]
pub struct StaticIntrospector {
    threads: Mutex<Vec<ThreadSnapshot>>,
    deadlocked: Mutex<Vec<ThreadId>>,
    dumps: Mutex<u64>,
}

impl StaticIntrospector {
    #[must_use]
    pub fn new(threads: Vec<ThreadSnapshot>) -> Self {
        Self {
            threads: Mutex::new(threads),
            deadlocked: Mutex::new(Vec::new()),
            dumps: Mutex::new(0),
        }
    }

    /// Mark `ids` as a detected lock cycle.
    #[must_use]
    pub fn with_deadlock(self, ids: Vec<ThreadId>) -> Self {
        *self.deadlocked.lock() = ids;
        self
    }

    pub fn set_threads(&self, threads: Vec<ThreadSnapshot>) {
        *self.threads.lock() = threads;
    }

    pub fn set_deadlocked(&self, ids: Vec<ThreadId>) {
        *self.deadlocked.lock() = ids;
    }

    /// Number of collections served (full dumps plus deadlock detail lookups).
    #[must_use]
    pub fn dump_count(&self) -> u64 {
        *self.dumps.lock()
    }
}

impl ThreadIntrospector for StaticIntrospector {
    fn find_deadlocked_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(self.deadlocked.lock().clone())
    }

    fn thread_info(&self, ids: &[ThreadId]) -> Result<Vec<ThreadSnapshot>> {
        *self.dumps.lock() += 1;
        let threads = self.threads.lock();
        Ok(ids
            .iter()
            .filter_map(|id| threads.iter().find(|t| t.id == *id).cloned())
            .collect())
    }

    fn dump_all_threads(&self, lock_detail: bool) -> Result<Vec<ThreadSnapshot>> {
        *self.dumps.lock() += 1;
        let threads = self.threads.lock();
        Ok(threads
            .iter()
            .cloned()
            .map(|t| if lock_detail { t } else { t.without_lock_detail() })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::LockInfo;

    fn threads() -> Vec<ThreadSnapshot> {
        vec![
            ThreadSnapshot::new(ThreadId(1), "Server thread")
                .with_monitor(LockInfo::new("world"), 0),
            ThreadSnapshot::new(ThreadId(2), "worker-1"),
        ]
    }

    #[test]
    fn dump_without_detail_strips_monitors() {
        let intro = StaticIntrospector::new(threads());
        let plain = intro.dump_all_threads(false).unwrap();
        assert!(plain[0].locked_monitors.is_empty());
        let full = intro.dump_all_threads(true).unwrap();
        assert_eq!(full[0].locked_monitors.len(), 1);
        assert_eq!(intro.dump_count(), 2);
    }

    #[test]
    fn thread_info_skips_unknown_ids() {
        let intro = StaticIntrospector::new(threads());
        let infos = intro.thread_info(&[ThreadId(2), ThreadId(99)]).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "worker-1");
    }

    #[test]
    fn deadlock_set_is_reported() {
        let intro = StaticIntrospector::new(threads()).with_deadlock(vec![ThreadId(1)]);
        assert_eq!(intro.find_deadlocked_threads().unwrap(), vec![ThreadId(1)]);
        intro.set_deadlocked(Vec::new());
        assert!(intro.find_deadlocked_threads().unwrap().is_empty());
    }
}
