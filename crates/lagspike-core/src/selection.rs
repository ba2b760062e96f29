//! Which threads make it into a default (non all-threads) report.

use serde::{Deserialize, Serialize};

use crate::snapshot::ThreadSnapshot;

/// Default name prefix of the monitored main-loop thread.
pub const DEFAULT_MAIN_THREAD_PREFIX: &str = "server thread";

/// Thread selection policy applied before grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadSelection {
    /// Keep every thread instead of just the main loop.
    pub all_threads: bool,
    /// Case-insensitive name prefix identifying the main-loop thread.
    pub main_thread_prefix: String,
}

impl Default for ThreadSelection {
    fn default() -> Self {
        Self {
            all_threads: false,
            main_thread_prefix: DEFAULT_MAIN_THREAD_PREFIX.to_string(),
        }
    }
}

impl ThreadSelection {
    /// Whether `thread` belongs to the monitored main loop.
    #[must_use]
    pub fn is_main_loop(&self, thread: &ThreadSnapshot) -> bool {
        starts_with_ignore_case(&thread.name, &self.main_thread_prefix)
    }

    /// Apply the policy to a whole capture; `include_all` keeps everything.
    #[must_use]
    pub fn apply(&self, threads: Vec<ThreadSnapshot>, include_all: bool) -> Vec<ThreadSnapshot> {
        if include_all {
            return threads;
        }
        threads.into_iter().filter(|t| self.is_main_loop(t)).collect()
    }
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.to_lowercase().starts_with(&prefix.to_lowercase())
}
