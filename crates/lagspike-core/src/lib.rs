//! lagspike-core: main-loop stall detection with deduplicated thread dumps
//!
//! A host ticks a heartbeat once per main-loop iteration. While a detection
//! session runs, a background thread polls the heartbeat; when the loop has
//! not ticked for longer than the threshold, every thread is captured,
//! grouped by identical stack and written to the log as one report.
//!
//! # Architecture
//!
//! ```text
//! main loop → HeartbeatRegister → SpikeDetector (session thread)
//!                                        ↓ stall
//!                  SnapshotCollector → group_threads + NoiseFilter
//!                                        ↓
//!                          SpikeReport → LogSink / OutputSink
//! ```
//!
//! # Modules
//!
//! - `heartbeat`: the tick slot written by the main loop
//! - `clock`: monotonic timestamps and the injectable `Clock`
//! - `detector`: the per-session polling state machine
//! - `session`: single-session admission and the detector thread
//! - `introspect`: the `ThreadIntrospector` backend trait
//! - `procfs`: Linux backend over `/proc/self/task`
//! - `deadlock`: `parking_lot` cycle detection (feature-gated: `deadlock-detection`)
//! - `collector`, `selection`: which threads a report covers
//! - `render`, `grouping`, `noise`, `report`: turning threads into text
//! - `host`: output, log and lifecycle interfaces the host implements
//! - `config`, `logging`: `lagspike.toml` and `tracing` setup
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod clock;
pub mod collector;
pub mod config;
pub mod deadlock;
pub mod detector;
pub mod error;
pub mod grouping;
pub mod heartbeat;
pub mod host;
pub mod introspect;
pub mod logging;
pub mod noise;
pub mod procfs;
pub mod render;
pub mod report;
pub mod selection;
pub mod session;
pub mod snapshot;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
