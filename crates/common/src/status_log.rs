use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_CAPACITY: usize = 10;

/// One observed status transition for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub id: u64,
    pub entity_key: String,
    pub rendered_status: String,
    pub timestamp: DateTime<Utc>,
}

struct LogState {
    entries: VecDeque<StatusLogEntry>,
    next_id: u64,
}

/// Bounded, deduplicating audit log shared between a widget and its mirrors.
/// Clones share the same buffer.
#[derive(Clone)]
pub struct StatusChangeLog {
    state: Arc<Mutex<LogState>>,
    capacity: usize,
}

impl StatusChangeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState {
                entries: VecDeque::with_capacity(capacity + 1),
                next_id: 1,
            })),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entity_key: &str, rendered_status: &str) -> Option<StatusLogEntry> {
        self.record_at(entity_key, rendered_status, Utc::now())
    }

    /// Appends unless the latest held entry for `entity_key` already shows
    /// `rendered_status`. Returns the appended entry.
    pub fn record_at(
        &self,
        entity_key: &str,
        rendered_status: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<StatusLogEntry> {
        let mut state = self.lock();

        let duplicate = state
            .entries
            .iter()
            .rev()
            .find(|e| e.entity_key == entity_key)
            .is_some_and(|e| e.rendered_status == rendered_status);
        if duplicate {
            return None;
        }

        let entry = StatusLogEntry {
            id: state.next_id,
            entity_key: entity_key.to_string(),
            rendered_status: rendered_status.to_string(),
            timestamp,
        };
        state.next_id += 1;
        state.entries.push_back(entry.clone());

        // Oldest first out
        while state.entries.len() > self.capacity {
            state.entries.pop_front();
        }
        Some(entry)
    }

    /// Entries in insertion order, oldest first.
    pub fn entries(&self) -> Vec<StatusLogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn latest_for(&self, entity_key: &str) -> Option<StatusLogEntry> {
        self.lock()
            .entries
            .iter()
            .rev()
            .find(|e| e.entity_key == entity_key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn save_to_csv(&self, filename: &str) -> Result<usize, Box<dyn std::error::Error>> {
        let entries = self.entries();
        let mut wtr = csv::Writer::from_path(filename)?;
        for entry in &entries {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(entries.len())
    }
}

impl Default for StatusChangeLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_duplicates_for_the_same_entity_are_dropped() {
        let log = StatusChangeLog::default();
        assert!(log.record("pump1", "ON").is_some());
        assert!(log.record("pump1", "ON").is_none());
        assert!(log.record("pump2", "ON").is_some());
        assert!(log.record("pump1", "ON").is_none());
        assert!(log.record("pump1", "OFF").is_some());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn unknown_is_deduplicated_like_any_other_status() {
        let log = StatusChangeLog::default();
        log.record("tank", "Unknown");
        log.record("tank", "Unknown");
        log.record("tank", "Normal");
        log.record("tank", "Unknown");
        let statuses: Vec<_> = log.entries().into_iter().map(|e| e.rendered_status).collect();
        assert_eq!(statuses, vec!["Unknown", "Normal", "Unknown"]);
    }

    #[test]
    fn keeps_only_the_most_recent_entries_in_order() {
        let log = StatusChangeLog::new(10);
        for i in 0..25 {
            log.record("sensor1", &format!("{}%", i));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries.first().unwrap().rendered_status, "15%");
        assert_eq!(entries.last().unwrap().rendered_status, "24%");
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn never_holds_consecutive_identical_statuses_per_entity() {
        let log = StatusChangeLog::new(10);
        let script = ["ON", "ON", "OFF", "OFF", "Unknown", "ON", "ON", "Unknown", "Unknown"];
        for (i, status) in script.iter().enumerate() {
            let entity = if i % 3 == 0 { "pump2" } else { "pump1" };
            log.record(entity, status);
        }
        for key in ["pump1", "pump2"] {
            let statuses: Vec<_> = log
                .entries()
                .into_iter()
                .filter(|e| e.entity_key == key)
                .map(|e| e.rendered_status)
                .collect();
            assert!(statuses.windows(2).all(|w| w[0] != w[1]), "{key}: {statuses:?}");
        }
    }

    #[test]
    fn latest_for_and_clear() {
        let log = StatusChangeLog::new(3);
        log.record("sensor1", "Dry - Needs Water");
        log.record("sensor2", "Moderate");
        log.record("sensor1", "Moderate");
        assert_eq!(log.latest_for("sensor1").unwrap().rendered_status, "Moderate");
        assert!(log.latest_for("pump1").is_none());

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.capacity(), 3);

        // Ids keep counting after a clear
        let next = log.record("sensor1", "Moderate").unwrap();
        assert_eq!(next.id, 4);
    }

    #[test]
    fn exports_entries_to_csv() {
        let log = StatusChangeLog::default();
        log.record("light", "Dark");
        log.record("light", "Bright");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let written = log.save_to_csv(path.to_str().unwrap()).unwrap();
        assert_eq!(written, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("id,entity_key,rendered_status,timestamp"));
        assert!(contents.contains("light,Bright"));
    }
}
