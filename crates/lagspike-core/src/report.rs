//! Lag spike reports: the text sent to the log sink.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::Collection;
use crate::grouping::{SignatureGroup, group_threads};
use crate::noise::NoiseFilter;
use crate::render::render_thread;
use crate::snapshot::ThreadSnapshot;

/// Thread dump section of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThreadDump {
    /// Deduplicated groups, sorted by representative name.
    Grouped { groups: Vec<SignatureGroup> },
    /// Every thread of a lock cycle, in full detail, never filtered.
    Deadlocked { threads: Vec<ThreadSnapshot> },
}

impl ThreadDump {
    /// Turn a collection into a dump, grouping and filtering unless deadlocked.
    #[must_use]
    pub fn from_collection(collection: Collection, filter: &dyn NoiseFilter) -> Self {
        if collection.deadlocked {
            Self::Deadlocked {
                threads: collection.threads,
            }
        } else {
            Self::Grouped {
                groups: group_threads(&collection.threads, filter),
            }
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Grouped { groups } => groups
                .iter()
                .map(SignatureGroup::render)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Deadlocked { threads } => {
                let mut out = String::from("Definitely deadlocked: \n");
                for thread in threads {
                    out.push_str(&render_thread(thread, true));
                    out.push('\n');
                }
                out
            }
        }
    }

    #[must_use]
    pub const fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlocked { .. })
    }
}

/// Full diagnostic for one detected stall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeReport {
    /// Time since the last heartbeat when the spike was confirmed.
    #[serde(with = "duration_ms")]
    pub dead_time: Duration,
    pub dump: ThreadDump,
}

impl SpikeReport {
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "The server appears to have lag spiked.\nLast tick {:.3}s ago.\n{}",
            self.dead_time.as_secs_f64(),
            self.dump.render()
        )
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
