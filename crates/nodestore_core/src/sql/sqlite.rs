//! SQLite adapter.

use super::{Connection, DataSource, Row, SqlError, SqlResult, SqlValue};
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, ToSql};
use std::path::{Path, PathBuf};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Integer(i) | Self::Timestamp(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Self::Text(s) | Self::Clob(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<SqliteValue> for SqlValue {
    fn from(value: SqliteValue) -> Self {
        match value {
            SqliteValue::Null => Self::Null,
            SqliteValue::Integer(i) => Self::Integer(i),
            SqliteValue::Real(f) => Self::Real(f),
            SqliteValue::Text(s) => Self::Text(s),
            SqliteValue::Blob(b) => Self::Blob(b),
        }
    }
}

/// A datasource backed by one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteDataSource {
    name: String,
    path: PathBuf,
}

impl SqliteDataSource {
    /// Creates a datasource for the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(name: &str, path: impl AsRef<Path>) -> SqlResult<Self> {
        let path = path.as_ref().to_path_buf();
        rusqlite::Connection::open(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// Runs a batch of statements, typically schema setup.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub fn execute_batch(&self, sql: &str) -> SqlResult<()> {
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for SqliteDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> SqlResult<Box<dyn Connection>> {
        let conn = rusqlite::Connection::open(&self.path)?;
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

/// An open SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> SqlResult<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SqlError::Connection("connection closed".to_string()))
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        Ok(self.conn()?.execute(sql, params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue], max_rows: usize) -> SqlResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from(row.get::<_, SqliteValue>(i)?));
            }
            out.push(values);
            if max_rows > 0 && out.len() >= max_rows {
                break;
            }
        }
        Ok(out)
    }

    // SQLite has no sequences; emulate them with a counter table.
    fn next_sequence_value(&mut self, sequence: &str) -> SqlResult<i64> {
        super::validate_identifier(sequence).map_err(SqlError::Type)?;
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodestore_sequences (name TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )?;
        conn.execute(
            "INSERT INTO nodestore_sequences (name, value) VALUES (?1, 1) \
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            [sequence],
        )?;
        let value = conn.query_row(
            "SELECT value FROM nodestore_sequences WHERE name = ?1",
            [sequence],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(value)
    }

    fn close(&mut self) -> SqlResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| SqlError::Sqlite(e))?;
        }
        Ok(())
    }
}
