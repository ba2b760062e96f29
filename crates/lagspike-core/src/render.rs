//! Text rendering of a single thread.
//!
//! The rendering without a header doubles as the thread's stack signature:
//! two threads with byte-identical signatures are grouped into one report
//! line.
//!
//! ```text
//! "Server thread" Id=12 BLOCKED on parking_lot::Mutex@7f00 owned by "io-1" Id=14
//! 	at server::world::World::save
//! 	-  blocked on parking_lot::Mutex@7f00
//! 	at server::tick
//! 	-  locked server::Chunk@1a0
//!
//! 	Number of locked synchronizers = 1
//! 	- std::sync::RwLock@2b0
//! ```

use std::fmt::Write;

use crate::snapshot::{ThreadSnapshot, ThreadState};

/// Render `thread`, prefixed with `"name" Id=id ` when `with_header` is set.
#[must_use]
pub fn render_thread(thread: &ThreadSnapshot, with_header: bool) -> String {
    let mut out = String::new();
    if with_header {
        let _ = write!(out, "{} ", header(thread));
    }
    out.push_str(&render_signature(thread));
    out
}

/// `"name" Id=id`
#[must_use]
pub fn header(thread: &ThreadSnapshot) -> String {
    format!("\"{}\" Id={}", thread.name, thread.id)
}

/// State line, annotated stack and synchronizer list; no name or id.
#[must_use]
pub fn render_signature(thread: &ThreadSnapshot) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", thread.state);
    if let Some(lock) = &thread.lock {
        let _ = write!(out, " on {lock}");
    }
    if let Some(owner) = &thread.lock_owner {
        let _ = write!(out, " owned by \"{}\" Id={}", owner.name, owner.id);
    }
    if thread.suspended {
        out.push_str(" (suspended)");
    }
    if thread.in_native {
        out.push_str(" (in native)");
    }
    out.push('\n');

    for (depth, frame) in thread.frames.iter().enumerate() {
        let _ = writeln!(out, "\tat {frame}");
        if depth == 0 {
            if let Some(lock) = &thread.lock {
                match thread.state {
                    ThreadState::Blocked => {
                        let _ = writeln!(out, "\t-  blocked on {lock}");
                    }
                    ThreadState::Waiting | ThreadState::TimedWaiting => {
                        let _ = writeln!(out, "\t-  waiting on {lock}");
                    }
                    _ => {}
                }
            }
        }
        for monitor in thread.locked_monitors.iter().filter(|m| m.stack_depth == depth) {
            let _ = writeln!(out, "\t-  locked {}", monitor.lock);
        }
    }

    if !thread.locked_synchronizers.is_empty() {
        let _ = writeln!(
            out,
            "\n\tNumber of locked synchronizers = {}",
            thread.locked_synchronizers.len()
        );
        for lock in &thread.locked_synchronizers {
            let _ = writeln!(out, "\t- {lock}");
        }
    }
    out.push('\n');
    out
}
