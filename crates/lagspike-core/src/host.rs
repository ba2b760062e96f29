//! Interfaces the embedding host provides to a detection session.
//!
//! The host owns the operator-facing output channel, the persistent log and
//! the answer to "is the monitored loop still alive". lagspike only talks to
//! them through these traits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Kind of party that asked for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterKind {
    /// An interactive operator; receives the short detection notice.
    Interactive,
    /// The host console. Already sees the full log, so it gets no notice.
    Console,
}

/// Whoever started a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    pub kind: RequesterKind,
}

impl Requester {
    #[must_use]
    pub fn interactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RequesterKind::Interactive,
        }
    }

    #[must_use]
    pub fn console() -> Self {
        Self {
            name: "console".to_string(),
            kind: RequesterKind::Console,
        }
    }

    #[must_use]
    pub const fn is_console(&self) -> bool {
        matches!(self.kind, RequesterKind::Console)
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Operator-facing text channel. Best effort: delivery failures are the
/// host's problem and never reach the detector.
pub trait OutputSink: Send + Sync {
    /// `None` targets the host's default audience (headless sessions).
    fn send_text(&self, requester: Option<&Requester>, message: &str);
}

/// Persistent log receiving full reports and failure causes.
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>);
}

/// Liveness of the monitored loop, queried only while the loop is stalled.
pub trait HostLifecycle: Send + Sync {
    fn is_running(&self) -> bool;
    fn has_stopped(&self) -> bool;
}

/// [`LogSink`] writing through `tracing` under target `lagspike::report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        match cause {
            Some(cause) => error!(target: "lagspike::report", cause = %cause, "{message}"),
            None => error!(target: "lagspike::report", "{message}"),
        }
    }
}

/// [`OutputSink`] writing operator messages as `info` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutputSink;

impl OutputSink for TracingOutputSink {
    fn send_text(&self, requester: Option<&Requester>, message: &str) {
        let requester = requester.map_or("-", |r| r.name.as_str());
        info!(target: "lagspike::output", requester, "{message}");
    }
}

/// Lifecycle backed by two flags the host flips itself.
#[derive(Debug)]
pub struct FlagLifecycle {
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Default for FlagLifecycle {
    fn default() -> Self {
        Self::running()
    }
}

impl FlagLifecycle {
    #[must_use]
    pub const fn running() -> Self {
        Self {
            running: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// Mark the monitored loop as shut down.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl HostLifecycle for FlagLifecycle {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn has_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
