//! Thread introspection via `/proc/self/task`.
//!
//! Each task directory yields one [`ThreadSnapshot`]:
//!
//! | file    | becomes                                      |
//! |---------|----------------------------------------------|
//! | `comm`  | thread name                                  |
//! | `stat`  | state (`R`, `S`, `D`, `T`, `Z`, ...)         |
//! | `wchan` | lock descriptor for sleeping threads         |
//! | `syscall` | "in native" for runnable threads inside a syscall |
//! | `stack` | kernel frames (usually root-only)            |
//!
//! Unreadable files leave the matching field empty. On platforms without
//! procfs the task directory does not exist and the thread list is empty.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::deadlock::DeadlockProbe;
use crate::error::{Error, Result};
use crate::introspect::ThreadIntrospector;
use crate::snapshot::{LockInfo, StackFrame, ThreadId, ThreadSnapshot, ThreadState};

const SELF_TASK_DIR: &str = "/proc/self/task";

/// Procfs-backed [`ThreadIntrospector`] for the current process.
#[derive(Debug)]
pub struct ProcfsIntrospector {
    task_dir: PathBuf,
    deadlocks: DeadlockProbe,
}

impl Default for ProcfsIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsIntrospector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_task_dir(SELF_TASK_DIR)
    }

    /// Read tasks from `task_dir` instead of `/proc/self/task`.
    #[must_use]
    pub fn with_task_dir(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
            deadlocks: DeadlockProbe::new(),
        }
    }

    fn task_ids(&self) -> Result<Vec<ThreadId>> {
        let entries = match std::fs::read_dir(&self.task_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.task_dir.display(), "No procfs task directory");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Introspection(format!(
                    "cannot list {}: {e}",
                    self.task_dir.display()
                )));
            }
        };

        let mut ids: Vec<ThreadId> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .map(ThreadId)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// `None` when the thread exited before its `stat` could be read.
    fn read_task(&self, id: ThreadId) -> Option<ThreadSnapshot> {
        let dir = self.task_dir.join(id.0.to_string());
        let stat = read_field(&dir, "stat")?;
        let Some(parsed) = parse_stat(&stat) else {
            warn!(tid = id.0, "Unparseable stat line");
            return None;
        };

        let name = read_field(&dir, "comm").map_or(parsed.comm, |c| c.trim_end().to_string());
        let mut snapshot = ThreadSnapshot::new(id, name).with_state(parsed.state);
        snapshot.suspended = parsed.stopped;

        if snapshot.state != ThreadState::Runnable {
            if let Some(wchan) = read_field(&dir, "wchan").and_then(|w| parse_wchan(&w)) {
                snapshot = snapshot.waiting_on(LockInfo::new(wchan), None);
            }
        }
        if snapshot.state == ThreadState::Runnable {
            snapshot.in_native = read_field(&dir, "syscall").is_some_and(|s| in_syscall(&s));
        }
        if let Some(stack) = read_field(&dir, "stack") {
            snapshot.frames = parse_kernel_stack(&stack);
        }
        Some(snapshot)
    }
}

impl ThreadIntrospector for ProcfsIntrospector {
    fn find_deadlocked_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(self.deadlocks.check())
    }

    fn thread_info(&self, ids: &[ThreadId]) -> Result<Vec<ThreadSnapshot>> {
        let mut found = self.deadlocks.detail(ids);
        for id in ids {
            if found.iter().any(|t| t.id == *id) {
                continue;
            }
            if let Some(snapshot) = self.read_task(*id) {
                found.push(snapshot);
            }
        }
        Ok(found)
    }

    fn dump_all_threads(&self, lock_detail: bool) -> Result<Vec<ThreadSnapshot>> {
        let threads = self
            .task_ids()?
            .into_iter()
            .filter_map(|id| self.read_task(id))
            .map(|t| if lock_detail { t } else { t.without_lock_detail() })
            .collect();
        Ok(threads)
    }
}

fn read_field(dir: &Path, file: &str) -> Option<String> {
    match std::fs::read_to_string(dir.join(file)) {
        Ok(text) => Some(text),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            None
        }
        Err(e) => {
            warn!(path = %dir.join(file).display(), error = %e, "Skipping unreadable thread field");
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct StatLine {
    comm: String,
    state: ThreadState,
    stopped: bool,
}

/// Parse `tid (comm) state ...`. The name may contain spaces and parens,
/// so it ends at the last `)`.
fn parse_stat(stat: &str) -> Option<StatLine> {
    let name_start = stat.find('(')?;
    let name_end = stat.rfind(')')?;
    if name_end < name_start {
        return None;
    }
    let comm = stat[name_start + 1..name_end].to_string();
    let state = stat.get(name_end + 1..)?.split_whitespace().next()?;
    let (state, stopped) = parse_linux_state(state);
    Some(StatLine {
        comm,
        state,
        stopped,
    })
}

fn parse_linux_state(s: &str) -> (ThreadState, bool) {
    match s {
        "R" => (ThreadState::Runnable, false),
        "S" | "I" | "W" => (ThreadState::Waiting, false),
        "D" => (ThreadState::Blocked, false),
        "T" | "t" => (ThreadState::Waiting, true),
        "Z" | "X" | "x" => (ThreadState::Terminated, false),
        _ => (ThreadState::Runnable, false),
    }
}

/// Kernel symbol the thread sleeps in; `0` or empty means not sleeping.
fn parse_wchan(wchan: &str) -> Option<String> {
    let wchan = wchan.trim();
    (!wchan.is_empty() && wchan != "0").then(|| wchan.to_string())
}

/// `syscall` starts with the syscall number while one is in progress,
/// `running` in user space and `-1` when blocked outside a syscall.
fn in_syscall(syscall: &str) -> bool {
    syscall
        .split_whitespace()
        .next()
        .and_then(|nr| nr.parse::<u64>().ok())
        .is_some()
}

/// `[<0>] futex_wait_queue+0x6f/0xa0` lines to frames named by symbol.
fn parse_kernel_stack(stack: &str) -> Vec<StackFrame> {
    stack
        .lines()
        .filter_map(|line| {
            let symbol = line.split_once("] ").map_or(line, |(_, rest)| rest).trim();
            let symbol = symbol.split('+').next()?.trim();
            (!symbol.is_empty()).then(|| StackFrame::new(symbol))
        })
        .collect()
}
