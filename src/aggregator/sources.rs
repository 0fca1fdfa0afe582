// Live per-source readings with staleness eviction.

use std::collections::HashMap;

use crate::models::Reading;

/// Max age of a source before it is dropped from aggregation, ms.
pub const DEFAULT_STALENESS_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub reading: Reading,
    pub last_seen: u64,
    /// When this entry was created. A source purged and seen again starts over.
    pub first_seen: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: HashMap<String, SourceEntry>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh `source_id`. Returns true when the source is new.
    pub fn upsert(&mut self, source_id: &str, reading: Reading, now_ms: u64) -> bool {
        match self.entries.get_mut(source_id) {
            Some(entry) => {
                entry.reading = reading;
                entry.last_seen = now_ms;
                false
            }
            None => {
                self.entries.insert(
                    source_id.to_string(),
                    SourceEntry {
                        reading,
                        last_seen: now_ms,
                        first_seen: now_ms,
                    },
                );
                true
            }
        }
    }

    /// Idempotent: removing an absent source is a no-op returning false.
    pub fn remove(&mut self, source_id: &str) -> bool {
        self.entries.remove(source_id).is_some()
    }

    /// Drop entries with `now - last_seen > window_ms`; returns the ids removed.
    pub fn purge_stale(&mut self, now_ms: u64, window_ms: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.last_seen) > window_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceEntry> {
        self.entries.get(source_id)
    }

    /// Readings ordered by source id so snapshots are deterministic.
    pub fn readings(&self) -> Vec<Reading> {
        let mut ids: Vec<&String> = self.entries.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| e.reading.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
