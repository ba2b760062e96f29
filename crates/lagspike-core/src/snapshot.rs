//! Point-in-time thread captures produced by an introspection backend.
//!
//! A [`ThreadSnapshot`] is immutable once built. Backends fill in whatever
//! they can observe; anything they cannot see stays empty/`None` and the
//! renderer prints around it.

use serde::{Deserialize, Serialize};

/// Backend-assigned thread identifier (kernel tid on Linux).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Runnable => write!(f, "RUNNABLE"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Waiting => write!(f, "WAITING"),
            Self::TimedWaiting => write!(f, "TIMED_WAITING"),
            Self::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Description of a lock or wait object, rendered as `kind@address`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockInfo {
    /// Lock type or wait channel name.
    pub kind: String,
    /// Address or identity of the lock instance, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
}

impl LockInfo {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: None,
        }
    }

    #[must_use]
    pub fn at(kind: impl Into<String>, address: u64) -> Self {
        Self {
            kind: kind.into(),
            address: Some(address),
        }
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.address {
            Some(address) => write!(f, "{}@{address:x}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Identity of the thread currently holding a contended lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner {
    pub name: String,
    pub id: ThreadId,
}

/// A lock held by the thread, acquired in the frame at `stack_depth`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub lock: LockInfo,
    /// Index into [`ThreadSnapshot::frames`] (0 = innermost).
    pub stack_depth: usize,
}

/// One call-stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Symbol or function path, e.g. `my_server::tick::World::step`.
    pub function: String,
    /// Source location (`file:line`) or offset, when resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl StackFrame {
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            location: None,
        }
    }

    #[must_use]
    pub fn with_location(function: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            location: Some(location.into()),
        }
    }

    /// Last path segment of the function, ignoring any generic suffix.
    ///
    /// Handles both `a::b::run` and dotted `a.b.C.run` symbol styles.
    #[must_use]
    pub fn method_name(&self) -> &str {
        let segment = self
            .function
            .rsplit("::")
            .find(|segment| !segment.starts_with('<'))
            .unwrap_or(&self.function);
        let segment = segment.split('<').next().unwrap_or(segment);
        segment.rsplit('.').next().unwrap_or(segment)
    }
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}({location})", self.function),
            None => write!(f, "{}", self.function),
        }
    }
}

/// Immutable capture of one thread at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    /// Lock the thread is blocked or waiting on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockInfo>,
    /// Holder of [`Self::lock`], when the backend can tell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<LockOwner>,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub in_native: bool,
    /// Call stack, innermost frame first.
    #[serde(default)]
    pub frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked_monitors: Vec<MonitorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked_synchronizers: Vec<LockInfo>,
}

impl ThreadSnapshot {
    /// A runnable thread with no stack or lock data.
    #[must_use]
    pub fn new(id: ThreadId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: ThreadState::Runnable,
            lock: None,
            lock_owner: None,
            suspended: false,
            in_native: false,
            frames: Vec::new(),
            locked_monitors: Vec::new(),
            locked_synchronizers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: ThreadState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_frames<I, F>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<StackFrame>,
    {
        self.frames = frames.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn waiting_on(mut self, lock: LockInfo, owner: Option<LockOwner>) -> Self {
        self.lock = Some(lock);
        self.lock_owner = owner;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, lock: LockInfo, stack_depth: usize) -> Self {
        self.locked_monitors.push(MonitorInfo { lock, stack_depth });
        self
    }

    #[must_use]
    pub fn with_synchronizer(mut self, lock: LockInfo) -> Self {
        self.locked_synchronizers.push(lock);
        self
    }

    /// Drop lock-ownership detail, as captured without monitor/synchronizer tracking.
    #[must_use]
    pub fn without_lock_detail(mut self) -> Self {
        self.locked_monitors.clear();
        self.locked_synchronizers.clear();
        self
    }
}

impl From<&str> for StackFrame {
    fn from(function: &str) -> Self {
        Self::new(function)
    }
}

impl From<String> for StackFrame {
    fn from(function: String) -> Self {
        Self::new(function)
    }
}
