use std::time::Duration;

use log::debug;
use rusqlite::{Connection, OpenFlags};

use crate::config::DatabaseConfig;
use crate::error::SqlDropError;

/// Applies SQL payloads to the target database.
///
/// Every call opens its own connection and closes it before returning. No
/// connection is held across the idle interval between passes.
pub trait Executor: Send + Sync {
    /// Check that the database can be reached
    fn probe(&self) -> Result<(), SqlDropError>;

    /// Submit an entire payload as one batch under autocommit. There is no
    /// whole-payload rollback: statements that ran before a failing statement
    /// stay committed.
    fn execute(&self, payload: &str) -> Result<(), SqlDropError>;
}

/// Executor backed by an SQLite database addressed by a URI filename
/// (`file:path?params`).
///
/// A missing database is an error unless the URI asks for `mode=rwc`, so a
/// mistyped path never receives units meant for the real target.
#[derive(Clone, Debug)]
pub struct SqliteExecutor {
    uri: String,
    busy_timeout: Duration,
}

impl SqliteExecutor {
    pub fn new(uri: impl Into<String>, busy_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            busy_timeout,
        }
    }

    pub fn from_config(database: &DatabaseConfig) -> Self {
        Self::new(database.uri.clone(), database.busy_timeout())
    }

    /// Whether the URI opts in to creating a missing database
    fn allows_create(&self) -> bool {
        self.uri
            .split_once('?')
            .is_some_and(|(_, query)| query.split('&').any(|param| param == "mode=rwc"))
    }

    fn connect(&self) -> Result<Connection, SqlDropError> {
        // URI mode can only narrow the open flags, so CREATE is added only on request
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.allows_create() {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&self.uri, flags)?;
        conn.busy_timeout(self.busy_timeout)?;

        Ok(conn)
    }

    fn close(conn: Connection) -> Result<(), SqlDropError> {
        conn.close().map_err(|(_, e)| SqlDropError::DatabaseError(e))
    }
}

impl Executor for SqliteExecutor {
    fn probe(&self) -> Result<(), SqlDropError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Self::close(conn)
    }

    fn execute(&self, payload: &str) -> Result<(), SqlDropError> {
        let conn = self.connect()?;

        if !conn.is_autocommit() {
            return Err(SqlDropError::Error(
                "Fresh connection is unexpectedly inside a transaction".into(),
            ));
        }

        debug!("Executing {} byte payload against {}", payload.len(), self.uri);
        let result = conn.execute_batch(payload);

        // Close even when the batch failed; the batch error wins if both fail
        let closed = Self::close(conn);
        result?;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn executor_for(path: &std::path::Path) -> SqliteExecutor {
        SqliteExecutor::new(
            format!("file:{}?mode=rwc", path.display()),
            Duration::from_millis(500),
        )
    }

    fn count_rows(path: &std::path::Path, table: &str) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_probe_creates_and_reaches_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("target.db");

        assert!(executor_for(&db_path).probe().is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_probe_does_not_create_missing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("targt.db");
        let executor = SqliteExecutor::new(
            format!("file:{}", db_path.display()),
            Duration::from_millis(100),
        );

        assert!(executor.probe().is_err());
        assert!(executor.execute("CREATE TABLE t (id INTEGER);").is_err());
        assert!(!db_path.exists());
    }

    #[test]
    fn test_allows_create_only_for_rwc_mode() {
        let timeout = Duration::from_millis(100);
        assert!(SqliteExecutor::new("file:a.db?mode=rwc", timeout).allows_create());
        assert!(SqliteExecutor::new("file:a.db?cache=shared&mode=rwc", timeout).allows_create());
        assert!(!SqliteExecutor::new("file:a.db", timeout).allows_create());
        assert!(!SqliteExecutor::new("file:a.db?mode=rw", timeout).allows_create());
        assert!(!SqliteExecutor::new("file:mode=rwc.db", timeout).allows_create());
    }

    #[test]
    fn test_probe_fails_when_database_missing_and_mode_rw() {
        let dir = tempdir().unwrap();
        let executor = SqliteExecutor::new(
            format!("file:{}?mode=rw", dir.path().join("absent.db").display()),
            Duration::from_millis(100),
        );

        assert!(matches!(
            executor.probe(),
            Err(SqlDropError::DatabaseError(_))
        ));
    }

    #[test]
    fn test_execute_multi_statement_payload() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("target.db");
        let executor = executor_for(&db_path);

        executor
            .execute(
                "CREATE TABLE events (id INTEGER PRIMARY KEY, title TEXT);
                 INSERT INTO events (title) VALUES ('a');
                 INSERT INTO events (title) VALUES ('b');",
            )
            .unwrap();

        assert_eq!(count_rows(&db_path, "events"), 2);
    }

    #[test]
    fn test_execute_syntax_error_reports_failure() {
        let dir = tempdir().unwrap();
        let executor = executor_for(&dir.path().join("target.db"));

        let err = executor.execute("INSERT INTO WHERE;").unwrap_err();
        assert!(matches!(err, SqlDropError::DatabaseError(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_execute_is_autocommit_per_statement() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("target.db");
        let executor = executor_for(&db_path);

        executor
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .unwrap();

        // The first insert commits even though the second statement fails
        let result = executor.execute("INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2);");
        assert!(result.is_err());
        assert_eq!(count_rows(&db_path, "t"), 1);
    }

    #[test]
    fn test_execute_constraint_violation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("target.db");
        let executor = executor_for(&db_path);

        executor
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();

        assert!(executor.execute("INSERT INTO t VALUES (1);").is_err());
        assert_eq!(count_rows(&db_path, "t"), 1);
    }

    #[test]
    fn test_open_transaction_in_payload_is_rolled_back_on_close() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("target.db");
        let executor = executor_for(&db_path);

        executor
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .unwrap();

        // A payload that opens a transaction and fails before COMMIT leaves nothing behind
        let result = executor.execute("BEGIN; INSERT INTO t VALUES (1); INSERT INTO nope VALUES (1); COMMIT;");
        assert!(result.is_err());
        assert_eq!(count_rows(&db_path, "t"), 0);
    }
}
