use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{NotificationRecord, UpdateMessage};

/// Per-source count of active, non-summary notifications.
///
/// Sources whose count drops to zero are pruned, so every stored count is
/// positive and `get` reports absent sources as `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCountTable {
    counts: BTreeMap<String, usize>,
}

impl ActiveCountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from an authoritative active set.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a NotificationRecord>) -> Self {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in records {
            let source_id = match record.validate() {
                Ok(source_id) => source_id,
                Err(err) => {
                    tracing::warn!(%err, ?record, "skipping malformed notification record");
                    continue;
                }
            };
            if record.counts_toward_badge() {
                *counts.entry(source_id.to_string()).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn get(&self, source_id: &str) -> usize {
        self.counts.get(source_id).copied().unwrap_or(0)
    }

    /// Stores `count` for `source_id` and returns the previous value.
    pub fn set(&mut self, source_id: &str, count: usize) -> usize {
        let previous = if count == 0 {
            self.counts.remove(source_id)
        } else {
            self.counts.insert(source_id.to_string(), count)
        };
        previous.unwrap_or(0)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.counts.contains_key(source_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(id, count)| (id.as_str(), *count))
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// One message per non-zero source, ordered by source id.
    pub fn snapshot(&self) -> Vec<UpdateMessage> {
        self.iter()
            .map(|(source_id, count)| UpdateMessage::new(source_id, count))
            .collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, usize> {
        self.counts.clone()
    }
}

/// Authoritative recount of a single source within an active set.
pub fn count_for<'a>(
    records: impl IntoIterator<Item = &'a NotificationRecord>,
    source_id: &str,
) -> usize {
    records
        .into_iter()
        .filter(|record| record.counts_toward_badge() && record.source_id() == source_id)
        .count()
}
