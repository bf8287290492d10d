use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use super::{Direction, LogRecord, LogStore, LogStoreError};

/// SQLite-backed log. Append order is the rowid order.
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteLogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, LogStoreError> {
        self.conn.lock().map_err(|_| LogStoreError::Poisoned)
    }

    fn ensure_schema(&self) -> Result<(), LogStoreError> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS log_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                direction TEXT NOT NULL,
                content TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl LogStore for SqliteLogStore {
    fn append(&self, direction: Direction, content: &str) -> Result<LogRecord, LogStoreError> {
        let record = LogRecord::now(direction, content);
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO log_records (timestamp, direction, content) VALUES (?1, ?2, ?3)",
            params![record.timestamp_string(), direction.as_str(), content],
        )?;
        tracing::debug!("Log append [{}]: {}", direction, content);
        Ok(record)
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT timestamp, direction, content FROM log_records ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .enumerate()
            .map(|(index, (timestamp, direction, content))| {
                LogRecord::from_columns(index + 1, timestamp, direction, content)
            })
            .collect()
    }

    fn replace_all(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM log_records", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO log_records (timestamp, direction, content) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                insert.execute(params![
                    record.timestamp_string(),
                    record.direction.as_str(),
                    record.content
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_come_back_in_append_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteLogStore::open(dir.path().join("log.db")).expect("open");

        store.append(Direction::Character, "干嘛(眨眼)").unwrap();
        store.append(Direction::User, "在忙").unwrap();
        store.append(Direction::System, "用户关闭弹窗").unwrap();

        let directions: Vec<_> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.direction)
            .collect();
        assert_eq!(
            directions,
            vec![Direction::Character, Direction::User, Direction::System]
        );
    }

    #[test]
    fn replace_all_is_visible_after_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.db");
        {
            let store = SqliteLogStore::open(&path).unwrap();
            for i in 0..4 {
                store.append(Direction::Character, &format!("r{i}")).unwrap();
            }
            let replacement = vec![
                LogRecord::now(Direction::Summary, "digest"),
                LogRecord::now(Direction::Character, "r3"),
            ];
            store.replace_all(&replacement).unwrap();
        }

        let reopened = SqliteLogStore::open(&path).unwrap();
        let records = reopened.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, Direction::Summary);
        assert_eq!(records[1].content, "r3");
    }
}
