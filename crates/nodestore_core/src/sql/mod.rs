//! Relational bridge.
//!
//! A [`DataSource`] hands out [`Connection`]s; statements are always
//! parameterized and values cross the boundary as [`SqlValue`]. Conversion
//! between property values and SQL values is table-driven by [`SqlType`]
//! category (see [`bind_value`] and [`read_value`]).

mod statement;
mod value;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use statement::{quote_literal, validate_identifier, validate_order, SelectBuilder, Statement};
pub use value::{bind_value, read_value, SqlCategory, SqlType, SqlValue};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteDataSource};

use thiserror::Error;

/// Result type for relational bridge operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// One result row, columns in select order.
pub type Row = Vec<SqlValue>;

/// Default limit for text bound as a plain string before switching to a
/// character large object.
pub const DEFAULT_MAX_TEXT_LEN: usize = 4000;

/// Errors raised by the relational bridge.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A statement failed to execute.
    #[error("statement failed: {message} [{sql}]")]
    Statement {
        /// The statement text.
        sql: String,
        /// Driver message.
        message: String,
    },

    /// Connecting to a datasource failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A value could not be converted.
    #[error("type error: {0}")]
    Type(String),

    /// No datasource is registered under the name.
    #[error("unknown datasource: {0}")]
    UnknownDataSource(String),

    /// SQLite driver error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SqlError {
    /// Creates a statement error.
    pub fn statement(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            sql: sql.into(),
            message: message.into(),
        }
    }
}

/// An open database connection.
pub trait Connection: Send {
    /// Executes a data-modifying statement, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize>;

    /// Runs a query. `max_rows == 0` means no limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn query(&mut self, sql: &str, params: &[SqlValue], max_rows: usize) -> SqlResult<Vec<Row>>;

    /// Longest text bound as a plain string.
    fn max_text_len(&self) -> usize {
        DEFAULT_MAX_TEXT_LEN
    }

    /// Draws the next value from a database sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence query fails or returns no number.
    fn next_sequence_value(&mut self, sequence: &str) -> SqlResult<i64> {
        validate_identifier(sequence).map_err(SqlError::Type)?;
        let sql = format!("SELECT {sequence}.nextval FROM dual");
        let rows = self.query(&sql, &[], 1)?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| SqlError::statement(sql, "sequence returned no value"))
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to close cleanly.
    fn close(&mut self) -> SqlResult<()> {
        Ok(())
    }
}

/// A named source of connections.
pub trait DataSource: Send + Sync {
    /// Datasource name, as referenced by mappings.
    fn name(&self) -> &str;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn connect(&self) -> SqlResult<Box<dyn Connection>>;
}
