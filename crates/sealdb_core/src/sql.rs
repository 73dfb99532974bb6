//! SQLite plumbing shared by the live session, the flush sequence and
//! recovery probing.

use crate::error::{CoreError, CoreResult};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Internal bookkeeping table carried by every sealed database.
pub const META_TABLE: &str = "sealdb_meta";

/// Row in [`META_TABLE`] counting flush sequences.
pub const WRITE_SEQ_KEY: &str = "write_seq";

/// First bytes of every SQLite database file.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Result of a single statement run through `Database::execute`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, empty for statements that return no rows.
    pub columns: Vec<String>,
    /// Returned rows in order.
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by the statement.
    pub changes: u64,
}

impl QueryResult {
    /// Returns true if the statement returned no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of `PRAGMA wal_checkpoint(TRUNCATE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// Non-zero if a reader or writer blocked the checkpoint.
    pub busy: i64,
    /// Frames in the WAL before the checkpoint, -1 outside WAL mode.
    pub log_frames: i64,
    /// Frames moved into the database file.
    pub checkpointed: i64,
}

/// Opens the live connection to a working copy.
///
/// WAL journaling with automatic checkpoints disabled, so the base file
/// only changes under an explicit [`checkpoint`].
pub fn open_live(path: &Path, busy_timeout: Duration) -> CoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA wal_autocheckpoint = 0;
         PRAGMA foreign_keys = ON;",
    )?;
    ensure_meta(&conn)?;
    Ok(conn)
}

/// Creates the bookkeeping table if missing.
pub fn ensure_meta(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {META_TABLE} (
             key TEXT PRIMARY KEY,
             value INTEGER NOT NULL
         );
         INSERT OR IGNORE INTO {META_TABLE} (key, value) VALUES ('{WRITE_SEQ_KEY}', 0);"
    ))?;
    Ok(())
}

/// Reads the write sequence, treating a missing table or row as 0.
pub fn read_write_seq(conn: &Connection) -> CoreResult<u64> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [META_TABLE],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let value: Option<i64> = conn
        .query_row(
            &format!("SELECT value FROM {META_TABLE} WHERE key = ?1"),
            [WRITE_SEQ_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map_or(0, |v| u64::try_from(v).unwrap_or(0)))
}

/// Increments the write sequence and returns the new value.
pub fn bump_write_seq(conn: &Connection) -> CoreResult<u64> {
    let value: i64 = conn.query_row(
        &format!(
            "INSERT INTO {META_TABLE} (key, value) VALUES (?1, 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1
             RETURNING value"
        ),
        [WRITE_SEQ_KEY],
        |row| row.get(0),
    )?;
    u64::try_from(value).map_err(|_| CoreError::flush(format!("negative write sequence {value}")))
}

/// Moves every committed WAL frame into the base file and truncates the WAL.
pub fn checkpoint(conn: &Connection) -> CoreResult<CheckpointOutcome> {
    let outcome = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
        Ok(CheckpointOutcome {
            busy: row.get(0)?,
            log_frames: row.get(1)?,
            checkpointed: row.get(2)?,
        })
    })?;
    Ok(outcome)
}

/// Returns a marker that moves whenever this connection changes rows or
/// the schema.
pub fn change_marker(conn: &Connection) -> CoreResult<(i64, i64)> {
    let changes: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    let schema: i64 = conn.query_row("PRAGMA schema_version", [], |row| row.get(0))?;
    Ok((changes, schema))
}

/// Returns true if `bytes` start with the SQLite file header.
#[must_use]
pub fn has_sqlite_header(bytes: &[u8]) -> bool {
    bytes.starts_with(SQLITE_HEADER)
}

/// Opens an existing database file for inspection, never creating one.
pub fn open_existing(path: &Path) -> CoreResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Runs `PRAGMA quick_check` and returns true if it reports `ok`.
pub fn quick_check(conn: &Connection) -> CoreResult<bool> {
    let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    Ok(result == "ok")
}

/// Runs `PRAGMA integrity_check` and returns every reported problem.
pub fn integrity_check(conn: &Connection) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let messages = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages.into_iter().filter(|m| m != "ok").collect())
}

/// Runs one statement, returning rows if it produces any.
///
/// The flag is true if the statement may have written to the database.
pub fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> CoreResult<(QueryResult, bool)> {
    let mut stmt = conn.prepare(sql)?;
    let params = rusqlite::params_from_iter(params.iter());
    let readonly = stmt.readonly();

    if stmt.column_count() == 0 {
        let changes = stmt.execute(params)?;
        let result = QueryResult {
            changes: changes as u64,
            ..QueryResult::default()
        };
        return Ok((result, !readonly));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.query(params)?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Value>(i)?);
        }
        rows.push(values);
    }
    drop(cursor);

    let result = QueryResult {
        columns,
        rows,
        changes: if readonly { 0 } else { conn.changes() },
    };
    Ok((result, !readonly))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn live() -> (tempfile::TempDir, Connection) {
        let temp = tempdir().unwrap();
        let conn = open_live(&temp.path().join("wc.db"), Duration::from_secs(1)).unwrap();
        (temp, conn)
    }

    #[test]
    fn live_connection_uses_wal() {
        let (_temp, conn) = live();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let auto: i64 = conn
            .query_row("PRAGMA wal_autocheckpoint", [], |row| row.get(0))
            .unwrap();
        assert_eq!(auto, 0);
    }

    #[test]
    fn write_seq_starts_at_zero_and_bumps() {
        let (_temp, conn) = live();
        assert_eq!(read_write_seq(&conn).unwrap(), 0);
        assert_eq!(bump_write_seq(&conn).unwrap(), 1);
        assert_eq!(bump_write_seq(&conn).unwrap(), 2);
        assert_eq!(read_write_seq(&conn).unwrap(), 2);
    }

    #[test]
    fn write_seq_missing_table_is_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_write_seq(&conn).unwrap(), 0);
    }

    #[test]
    fn checkpoint_moves_commits_into_base_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wc.db");
        let conn = open_live(&path, Duration::from_secs(1)).unwrap();
        conn.execute_batch("CREATE TABLE t (x TEXT); INSERT INTO t VALUES ('hello');")
            .unwrap();

        let outcome = checkpoint(&conn).unwrap();
        assert_eq!(outcome.busy, 0);

        // A copy of the base file alone sees the row.
        let copy = temp.path().join("copy.db");
        std::fs::copy(&path, &copy).unwrap();
        let other = Connection::open(&copy).unwrap();
        let x: String = other.query_row("SELECT x FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(x, "hello");
    }

    #[test]
    fn run_statement_query_and_mutation() {
        let (_temp, conn) = live();
        let (created, mutated) =
            run_statement(&conn, "CREATE TABLE t (a INTEGER, b TEXT)", &[]).unwrap();
        assert!(created.columns.is_empty());
        assert!(mutated);

        let (inserted, _) = run_statement(
            &conn,
            "INSERT INTO t VALUES (?1, ?2)",
            &[Value::Integer(7), Value::Text("seven".into())],
        )
        .unwrap();
        assert_eq!(inserted.changes, 1);

        let (selected, mutated) = run_statement(&conn, "SELECT a, b FROM t", &[]).unwrap();
        assert!(!mutated);
        assert_eq!(selected.columns, vec!["a", "b"]);
        assert_eq!(
            selected.rows,
            vec![vec![Value::Integer(7), Value::Text("seven".into())]]
        );
    }

    #[test]
    fn header_detection() {
        assert!(has_sqlite_header(b"SQLite format 3\0rest"));
        assert!(!has_sqlite_header(b"SQLite format 2\0rest"));
        assert!(!has_sqlite_header(b""));
    }

    #[test]
    fn checks_pass_on_fresh_database() {
        let (_temp, conn) = live();
        assert!(quick_check(&conn).unwrap());
        assert!(integrity_check(&conn).unwrap().is_empty());
    }
}
