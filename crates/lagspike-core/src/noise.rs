//! Suppression of known-idle thread signatures.
//!
//! Idle pool workers parked on their job queue look identical on every
//! dump and bury the interesting threads. A [`NoiseFilter`] decides, per
//! rendered thread, whether it is such boilerplate.

use serde::{Deserialize, Serialize};

use crate::snapshot::ThreadSnapshot;

/// Decides whether a thread is idle noise that should not appear in a report.
pub trait NoiseFilter: Send + Sync {
    /// `signature` is the header-less rendering of `thread`.
    fn is_noise(&self, thread: &ThreadSnapshot, signature: &str) -> bool;
}

/// Filter that keeps every thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl NoiseFilter for KeepAll {
    fn is_noise(&self, _thread: &ThreadSnapshot, _signature: &str) -> bool {
        false
    }
}

/// Configuration for [`IdleWorkerFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseFilterConfig {
    /// Turn suppression off entirely.
    pub enabled: bool,
    /// Threads with more run-method frames than this are never suppressed.
    pub max_run_frames: usize,
    /// Method name that marks a thread/task entry frame.
    pub run_method: String,
    /// Substrings of frames that mean "parked waiting for the next job".
    pub idle_wait_patterns: Vec<String>,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_run_frames: 2,
            run_method: "run".to_string(),
            idle_wait_patterns: default_idle_wait_patterns(),
        }
    }
}

fn default_idle_wait_patterns() -> Vec<String> {
    vec![
        "crossbeam_channel::channel::Receiver<T>::recv".to_string(),
        "std::sync::mpsc::Receiver<T>::recv".to_string(),
        "std::sync::mpmc::Receiver<T>::recv".to_string(),
        "LinkedBlockingQueue.take".to_string(),
    ]
}

/// Suppresses shallow worker threads parked in a queue receive.
///
/// A thread is noise when its stack has at most `max_run_frames` run-method
/// frames and any frame matches one of `idle_wait_patterns`. Deeper stacks
/// mean the worker is nested inside real work and is kept.
#[derive(Debug, Clone, Default)]
pub struct IdleWorkerFilter {
    config: NoiseFilterConfig,
}

impl IdleWorkerFilter {
    #[must_use]
    pub fn new(config: NoiseFilterConfig) -> Self {
        Self { config }
    }

    fn run_frames(&self, thread: &ThreadSnapshot) -> usize {
        thread
            .frames
            .iter()
            .filter(|frame| frame.method_name() == self.config.run_method)
            .count()
    }

    fn has_idle_wait(&self, thread: &ThreadSnapshot) -> bool {
        thread.frames.iter().any(|frame| {
            self.config
                .idle_wait_patterns
                .iter()
                .any(|pattern| frame.function.contains(pattern.as_str()))
        })
    }
}

impl NoiseFilter for IdleWorkerFilter {
    fn is_noise(&self, thread: &ThreadSnapshot, _signature: &str) -> bool {
        self.config.enabled
            && self.run_frames(thread) <= self.config.max_run_frames
            && self.has_idle_wait(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ThreadId;

    fn idle_worker() -> ThreadSnapshot {
        ThreadSnapshot::new(ThreadId(5), "pool-1-worker-2").with_frames([
            "std::sync::mpmc::Receiver<T>::recv",
            "threadpool::Worker::run",
            "std::thread::Builder::spawn_unchecked_::{{closure}}",
        ])
    }

    #[test]
    fn shallow_idle_worker_is_noise() {
        let filter = IdleWorkerFilter::default();
        assert!(filter.is_noise(&idle_worker(), ""));
    }

    #[test]
    fn busy_worker_is_kept() {
        let filter = IdleWorkerFilter::default();
        let busy = ThreadSnapshot::new(ThreadId(6), "pool-1-worker-3")
            .with_frames(["server::save_chunk", "threadpool::Worker::run"]);
        assert!(!filter.is_noise(&busy, ""));
    }

    #[test]
    fn deeply_nested_run_frames_are_kept_even_when_waiting() {
        let filter = IdleWorkerFilter::default();
        let nested = ThreadSnapshot::new(ThreadId(7), "nested").with_frames([
            "std::sync::mpmc::Receiver<T>::recv",
            "a::Task::run",
            "b::Task::run",
            "c::Task::run",
        ]);
        assert!(!filter.is_noise(&nested, ""));
    }

    #[test]
    fn run_frames_at_limit_are_still_noise() {
        let filter = IdleWorkerFilter::default();
        let two_deep = ThreadSnapshot::new(ThreadId(9), "pool-2-worker-1").with_frames([
            "std::sync::mpmc::Receiver<T>::recv",
            "pool::Task::run",
            "pool::Worker::run",
        ]);
        assert_eq!(filter.run_frames(&two_deep), 2);
        assert!(filter.is_noise(&two_deep, ""));
    }

    #[test]
    fn disabled_filter_keeps_idle_workers() {
        let filter = IdleWorkerFilter::new(NoiseFilterConfig {
            enabled: false,
            ..NoiseFilterConfig::default()
        });
        assert!(!filter.is_noise(&idle_worker(), ""));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let filter = IdleWorkerFilter::new(NoiseFilterConfig {
            idle_wait_patterns: vec!["tokio::runtime::park".into()],
            ..NoiseFilterConfig::default()
        });
        assert!(!filter.is_noise(&idle_worker(), ""));
        let parked = ThreadSnapshot::new(ThreadId(8), "tokio-runtime-worker")
            .with_frames(["tokio::runtime::park::Inner::park"]);
        assert!(filter.is_noise(&parked, ""));
    }

    #[test]
    fn keep_all_never_suppresses() {
        assert!(!KeepAll.is_noise(&idle_worker(), ""));
    }
}
