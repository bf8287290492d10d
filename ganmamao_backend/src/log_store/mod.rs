pub mod csv_file;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::LogBackend;
use crate::llm_client::Summarizer;

pub use csv_file::CsvLogStore;
pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

pub const LOG_HEADER: [&str; 3] = ["timestamp", "direction", "content"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Who produced a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    User,
    Character,
    System,
    Summary,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::User => "user",
            Direction::Character => "character",
            Direction::System => "system",
            Direction::Summary => "summary",
        }
    }

    pub fn is_dialog(self) -> bool {
        matches!(self, Direction::User | Direction::Character)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Direction::User),
            // Logs written before the rename used "cat".
            "character" | "cat" => Ok(Direction::Character),
            "system" => Ok(Direction::System),
            "summary" => Ok(Direction::Summary),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub content: String,
}

impl LogRecord {
    pub fn now(direction: Direction, content: impl Into<String>) -> Self {
        Self {
            timestamp: local_now(),
            direction,
            content: content.into(),
        }
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Rebuild a record from the three persisted columns.
    pub fn from_columns(
        row: usize,
        timestamp: &str,
        direction: &str,
        content: &str,
    ) -> Result<Self, LogStoreError> {
        let timestamp = parse_timestamp(timestamp).ok_or_else(|| LogStoreError::InvalidRow {
            row,
            reason: format!("unparseable timestamp '{timestamp}'"),
        })?;
        let direction = direction
            .parse::<Direction>()
            .map_err(|reason| LogStoreError::InvalidRow { row, reason })?;
        Ok(Self {
            timestamp,
            direction,
            content: content.to_string(),
        })
    }
}

fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    // Persisted precision is whole seconds.
    now.with_nanosecond(0).unwrap_or(now)
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Local).naive_local())
        })
}

#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    #[error("log I/O failed on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log file {path:?} could not be read or written as CSV: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("sqlite log error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid log row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error("log store lock poisoned")]
    Poisoned,
}

/// Ordered, append-only record storage.
///
/// Records come back from `read_all` in append order. The only way to remove
/// rows is a wholesale `replace_all`, which must leave either the old or the
/// new sequence on disk, never a mix.
pub trait LogStore: Send + Sync {
    fn append(&self, direction: Direction, content: &str) -> Result<LogRecord, LogStoreError>;
    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError>;
    fn replace_all(&self, records: &[LogRecord]) -> Result<(), LogStoreError>;
    fn describe(&self) -> String;
}

/// Open the configured backend at `path`, creating it when missing.
pub fn open_log_store(backend: LogBackend, path: &Path) -> Result<Arc<dyn LogStore>, LogStoreError> {
    let store: Arc<dyn LogStore> = match backend {
        LogBackend::Csv => Arc::new(CsvLogStore::open(path)?),
        LogBackend::Sqlite => Arc::new(SqliteLogStore::open(path)?),
        LogBackend::Memory => Arc::new(MemoryLogStore::new()),
    };
    tracing::info!("Using log store {}", store.describe());
    Ok(store)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Skipped { len: usize },
    Compacted { before: usize, after: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error(transparent)]
    Store(#[from] LogStoreError),
    #[error("summarizer failed: {0:#}")]
    Summarizer(anyhow::Error),
}

/// Render rows as `direction: content` lines, the form handed to the summarizer.
pub fn render_rows(records: &[LogRecord]) -> String {
    records
        .iter()
        .map(|record| format!("{}: {}", record.direction, record.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fold the oldest `compress_batch` rows into one `summary` row once the log
/// holds more than `max_records` rows.
pub async fn compact_if_needed(
    store: &dyn LogStore,
    max_records: usize,
    compress_batch: usize,
    summarizer: &dyn Summarizer,
) -> Result<CompactionOutcome, CompactionError> {
    let records = store.read_all()?;
    let before = records.len();
    if before <= max_records || compress_batch == 0 {
        return Ok(CompactionOutcome::Skipped { len: before });
    }

    let batch = compress_batch.min(before);
    tracing::info!(
        "Log has {} rows (limit {}), compressing oldest {}",
        before,
        max_records,
        batch
    );
    let (oldest, remainder) = records.split_at(batch);
    let summary = summarizer
        .summarize(&render_rows(oldest))
        .await
        .map_err(CompactionError::Summarizer)?;
    let summary = match summary.trim() {
        "" => crate::context::NONE_SENTINEL,
        text => text,
    };

    let mut replacement = Vec::with_capacity(remainder.len() + 1);
    replacement.push(LogRecord::now(Direction::Summary, summary));
    replacement.extend_from_slice(remainder);
    store.replace_all(&replacement)?;

    let after = replacement.len();
    tracing::info!("Log compacted: {} -> {} rows", before, after);
    Ok(CompactionOutcome::Compacted { before, after })
}
