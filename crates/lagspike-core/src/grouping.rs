//! Deduplication of thread renderings by stack signature.
//!
//! Threads whose header-less rendering is byte-identical collapse into one
//! [`SignatureGroup`]. Groups are rebuilt from scratch for every report.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::noise::NoiseFilter;
use crate::render::render_signature;
use crate::snapshot::{ThreadId, ThreadSnapshot};

/// Threads sharing one rendered signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureGroup {
    /// Shared rendering (state, lock info, stack), without name or id.
    pub signature: String,
    /// Member thread names, sorted case-insensitively.
    pub members: Vec<String>,
    /// Case-insensitive minimum member name; orders groups in a report.
    pub representative: String,
    pub representative_id: ThreadId,
}

impl SignatureGroup {
    /// `"name1", "name2" <signature>`
    #[must_use]
    pub fn render(&self) -> String {
        format!("\"{}\" {}", self.members.join("\", \""), self.signature)
    }
}

/// Case-insensitive name order with a case-sensitive tiebreak, so the
/// result is deterministic for names differing only in case.
#[must_use]
pub fn name_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Group `threads` by signature, dropping those `filter` marks as noise.
///
/// The result is sorted by representative name.
#[must_use]
pub fn group_threads(threads: &[ThreadSnapshot], filter: &dyn NoiseFilter) -> Vec<SignatureGroup> {
    let mut by_signature: BTreeMap<String, Vec<&ThreadSnapshot>> = BTreeMap::new();
    for thread in threads {
        let signature = render_signature(thread);
        if filter.is_noise(thread, &signature) {
            continue;
        }
        by_signature.entry(signature).or_default().push(thread);
    }

    let mut groups: Vec<SignatureGroup> = by_signature
        .into_iter()
        .filter_map(|(signature, mut members)| {
            members.sort_by(|a, b| name_order(&a.name, &b.name));
            let representative = *members.first()?;
            Some(SignatureGroup {
                representative: representative.name.clone(),
                representative_id: representative.id,
                members: members.iter().map(|t| t.name.clone()).collect(),
                signature,
            })
        })
        .collect();

    groups.sort_by(|a, b| {
        name_order(&a.representative, &b.representative).then_with(|| a.signature.cmp(&b.signature))
    });
    groups
}
