use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of one accepted toggle command.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CommandRecord {
    pub path: String,
    pub started_at: DateTime<Utc>,
    pub previous: Option<bool>,
    pub written: Option<bool>,
    pub succeeded: bool,
    pub error: Option<String>,
    pub latency_us: u64,
}

/// Thread-safe command history. Cloning shares the same buffer.
#[derive(Clone, Default)]
pub struct CommandRecorder {
    records: Arc<Mutex<Vec<CommandRecord>>>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: CommandRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn get_results(&self) -> Vec<CommandRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failures(&self) -> usize {
        self.get_results().iter().filter(|r| !r.succeeded).count()
    }

    pub fn save_to_csv(&self, filename: &str) -> Result<usize, Box<dyn std::error::Error>> {
        let data = self.get_results();
        let mut wtr = csv::Writer::from_path(filename)?;
        for record in data.iter() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(data.len())
    }
}
