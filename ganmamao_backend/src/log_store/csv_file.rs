use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Direction, LogRecord, LogStore, LogStoreError, LOG_HEADER};

/// CSV log file with a `timestamp,direction,content` header row.
pub struct CsvLogStore {
    path: PathBuf,
}

impl CsvLogStore {
    /// Open the log at `path`, creating parent directories and a header-only
    /// file on first run.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LogStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let store = Self { path };
        if !store.path.exists() {
            tracing::info!("Creating log file {:?}", store.path);
            store.write_file(&store.path, &[])?;
        }
        Ok(store)
    }

    fn io_error(&self, source: std::io::Error) -> LogStoreError {
        LogStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LogStoreError {
        LogStoreError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn encode_row(&self, record: &LogRecord) -> Result<Vec<u8>, LogStoreError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record([
                record.timestamp_string().as_str(),
                record.direction.as_str(),
                record.content.as_str(),
            ])
            .map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))?;
        writer
            .into_inner()
            .map_err(|e| self.io_error(inner_error(&e)))
    }

    fn write_file(&self, target: &Path, records: &[LogRecord]) -> Result<(), LogStoreError> {
        let file = File::create(target).map_err(|e| self.io_error(e))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(LOG_HEADER)
            .map_err(|e| self.csv_error(e))?;
        for record in records {
            writer
                .write_record([
                    record.timestamp_string().as_str(),
                    record.direction.as_str(),
                    record.content.as_str(),
                ])
                .map_err(|e| self.csv_error(e))?;
        }
        writer.flush().map_err(|e| self.io_error(e))?;
        let file = writer
            .into_inner()
            .map_err(|e| self.io_error(inner_error(&e)))?;
        file.sync_all().map_err(|e| self.io_error(e))
    }
}

fn inner_error<W>(err: &csv::IntoInnerError<W>) -> std::io::Error {
    std::io::Error::new(err.error().kind(), err.error().to_string())
}

impl LogStore for CsvLogStore {
    fn append(&self, direction: Direction, content: &str) -> Result<LogRecord, LogStoreError> {
        let record = LogRecord::now(direction, content);
        // One write call per row so a crash never leaves half a record.
        let row = self.encode_row(&record)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&row).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;

        tracing::debug!("Log append [{}]: {}", direction, content);
        Ok(record)
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.map_err(|e| self.csv_error(e))?;
            // Row numbers are 1-based and count the header.
            let line = index + 2;
            if row.len() != LOG_HEADER.len() {
                return Err(LogStoreError::InvalidRow {
                    row: line,
                    reason: format!("expected 3 columns, found {}", row.len()),
                });
            }
            records.push(LogRecord::from_columns(line, &row[0], &row[1], &row[2])?);
        }
        Ok(records)
    }

    fn replace_all(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        self.write_file(&staging, records)?;
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;
        tracing::debug!("Rewrote {:?} with {} rows", self.path, records.len());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_header_only_file_on_first_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("log.csv");
        let store = CsvLogStore::open(&path).expect("open");

        assert_eq!(fs::read_to_string(&path).unwrap(), "timestamp,direction,content\n");
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn appends_preserve_order_and_quoting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CsvLogStore::open(dir.path().join("log.csv")).expect("open");

        store.append(Direction::Character, "干嘛，叫我？(伸懒腰)").unwrap();
        store.append(Direction::User, "line one\nline \"two\"").unwrap();
        store.append(Direction::System, "用户关闭弹窗").unwrap();

        let records = store.read_all().unwrap();
        let contents: Vec<_> = records.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["干嘛，叫我？(伸懒腰)", "line one\nline \"two\"", "用户关闭弹窗"]
        );
        assert_eq!(records[1].direction, Direction::User);
    }

    #[test]
    fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.csv");
        CsvLogStore::open(&path)
            .unwrap()
            .append(Direction::User, "hi")
            .unwrap();

        let reopened = CsvLogStore::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap().len(), 1);
    }

    #[test]
    fn reads_legacy_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "timestamp,direction,content\n2025-01-02T03:04:05,cat,干嘛(打滚)\n2025-01-02T03:05:00,user,嗨\n",
        )
        .unwrap();

        let records = CsvLogStore::open(&path).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, Direction::Character);
        assert_eq!(records[0].timestamp_string(), "2025-01-02T03:04:05");
    }

    #[test]
    fn malformed_row_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.csv");
        fs::write(&path, "timestamp,direction,content\n2025-01-02T03:04:05,user\n").unwrap();

        let err = CsvLogStore::open(&path).unwrap().read_all().unwrap_err();
        assert!(matches!(err, LogStoreError::InvalidRow { row: 2, .. }));
    }

    #[test]
    fn replace_all_swaps_contents_and_removes_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.csv");
        let store = CsvLogStore::open(&path).unwrap();
        for i in 0..5 {
            store.append(Direction::Character, &format!("r{i}")).unwrap();
        }

        let replacement = vec![
            LogRecord::now(Direction::Summary, "摘要"),
            LogRecord::now(Direction::Character, "r4"),
        ];
        store.replace_all(&replacement).unwrap();

        assert_eq!(store.read_all().unwrap(), replacement);
        assert!(!dir.path().join("log.csv.tmp").exists());
    }
}
