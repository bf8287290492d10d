use std::sync::Mutex;

use super::{Direction, LogRecord, LogStore, LogStoreError};

/// Volatile log used for dry runs and tests.
#[derive(Default)]
pub struct MemoryLogStore {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<LogRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, direction: Direction, content: &str) -> Result<LogRecord, LogStoreError> {
        let record = LogRecord::now(direction, content);
        self.records
            .lock()
            .map_err(|_| LogStoreError::Poisoned)?
            .push(record.clone());
        tracing::debug!("Log append [{}]: {}", direction, content);
        Ok(record)
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| LogStoreError::Poisoned)?
            .clone())
    }

    fn replace_all(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        *self.records.lock().map_err(|_| LogStoreError::Poisoned)? = records.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
