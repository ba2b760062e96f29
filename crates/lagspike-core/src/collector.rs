//! On-demand thread capture.
//!
//! A lock cycle takes priority: when the backend reports deadlocked threads,
//! only those are returned, with full lock detail. Otherwise every thread is
//! captured and narrowed by the [`ThreadSelection`] policy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::introspect::ThreadIntrospector;
use crate::selection::ThreadSelection;
use crate::snapshot::ThreadSnapshot;

/// Output of one collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub threads: Vec<ThreadSnapshot>,
    /// `threads` is exactly the set of deadlocked threads.
    pub deadlocked: bool,
}

/// Captures thread snapshots through a [`ThreadIntrospector`].
#[derive(Clone)]
pub struct SnapshotCollector {
    introspector: Arc<dyn ThreadIntrospector>,
    selection: ThreadSelection,
}

impl std::fmt::Debug for SnapshotCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCollector")
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl SnapshotCollector {
    #[must_use]
    pub fn new(introspector: Arc<dyn ThreadIntrospector>, selection: ThreadSelection) -> Self {
        Self {
            introspector,
            selection,
        }
    }

    /// Same backend, different selection policy.
    #[must_use]
    pub fn with_selection(mut self, selection: ThreadSelection) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn selection(&self) -> &ThreadSelection {
        &self.selection
    }

    /// Capture threads. `include_all` gathers lock detail for every thread
    /// and bypasses the main-loop selection.
    pub fn collect(&self, include_all: bool) -> Result<Collection> {
        let deadlocked_ids = self.introspector.find_deadlocked_threads()?;
        if !deadlocked_ids.is_empty() {
            let threads = self.introspector.thread_info(&deadlocked_ids)?;
            if threads.is_empty() {
                warn!(
                    reported = deadlocked_ids.len(),
                    "Deadlocked threads exited before capture; falling back to full dump"
                );
            } else {
                return Ok(Collection {
                    threads,
                    deadlocked: true,
                });
            }
        }

        let captured = self.introspector.dump_all_threads(include_all)?;
        let total = captured.len();
        let threads = self.selection.apply(captured, include_all);
        debug!(total, kept = threads.len(), include_all, "Captured thread snapshots");
        Ok(Collection {
            threads,
            deadlocked: false,
        })
    }
}
