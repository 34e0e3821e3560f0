//! Parameterized statement construction.
//!
//! Identifiers are interpolated into statement text and must have passed
//! [`validate_identifier`] when the schema was loaded; values are always
//! bound as `?` parameters.

use super::SqlValue;

/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Builds `INSERT INTO table (cols) VALUES (?, ...)`.
    #[must_use]
    pub fn insert(table: &str, columns: Vec<(String, SqlValue)>) -> Self {
        let (names, params): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
        let marks = vec!["?"; names.len()].join(", ");
        Self {
            sql: format!("INSERT INTO {table} ({}) VALUES ({marks})", names.join(", ")),
            params,
        }
    }

    /// Builds `UPDATE table SET c = ?, ... WHERE id_column = ?`.
    #[must_use]
    pub fn update(table: &str, sets: Vec<(String, SqlValue)>, id_column: &str, id: SqlValue) -> Self {
        let (names, mut params): (Vec<_>, Vec<_>) = sets.into_iter().unzip();
        let assignments: Vec<_> = names.iter().map(|n| format!("{n} = ?")).collect();
        params.push(id);
        Self {
            sql: format!(
                "UPDATE {table} SET {} WHERE {id_column} = ?",
                assignments.join(", ")
            ),
            params,
        }
    }

    /// Builds `DELETE FROM table WHERE id_column = ?`.
    #[must_use]
    pub fn delete(table: &str, id_column: &str, id: SqlValue) -> Self {
        Self {
            sql: format!("DELETE FROM {table} WHERE {id_column} = ?"),
            params: vec![id],
        }
    }

    /// Renders the statement with parameters substituted, for logging only.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        for ch in self.sql.chars() {
            if ch == '?' {
                match params.next() {
                    Some(p) => out.push_str(&p.to_string()),
                    None => out.push('?'),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }
}

/// Builder for `SELECT` statements over one table and optional joins.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order: Option<String>,
}

impl SelectBuilder {
    /// Starts a select from `table`.
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            order: None,
        }
    }

    /// Adds a select expression as-is.
    #[must_use]
    pub fn expr(mut self, expr: impl Into<String>) -> Self {
        self.columns.push(expr.into());
        self
    }

    /// Adds `table.column` for every column.
    #[must_use]
    pub fn columns<'a>(mut self, qualifier: &str, columns: impl IntoIterator<Item = &'a str>) -> Self {
        for c in columns {
            self.columns.push(format!("{qualifier}.{c}"));
        }
        self
    }

    /// Adds `LEFT OUTER JOIN other alias ON table.local = alias.foreign`.
    #[must_use]
    pub fn left_join(mut self, other: &str, alias: &str, local: &str, foreign: &str) -> Self {
        self.joins.push(format!(
            "LEFT OUTER JOIN {other} {alias} ON {}.{local} = {alias}.{foreign}",
            self.table
        ));
        self
    }

    /// Adds `table.column = ?`.
    #[must_use]
    pub fn where_eq(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions.push(format!("{}.{column} = ?", self.table));
        self.params.push(value);
        self
    }

    /// Adds `table.column IS NULL`.
    #[must_use]
    pub fn where_null(mut self, column: &str) -> Self {
        self.conditions.push(format!("{}.{column} IS NULL", self.table));
        self
    }

    /// Adds `table.column IN (?, ...)`.
    #[must_use]
    pub fn where_in(mut self, column: &str, values: Vec<SqlValue>) -> Self {
        let marks = vec!["?"; values.len()].join(", ");
        self.conditions.push(format!("{}.{column} IN ({marks})", self.table));
        self.params.extend(values);
        self
    }

    /// Sets the `ORDER BY` clause. Unqualified columns refer to the main table.
    #[must_use]
    pub fn order_by(mut self, order: Option<&str>) -> Self {
        self.order = order.map(str::to_string);
        self
    }

    /// Builds the statement.
    #[must_use]
    pub fn build(self) -> Statement {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if let Some(order) = &self.order {
            let terms: Vec<_> = order
                .split(',')
                .map(|term| {
                    let term = term.trim();
                    if term.contains('.') {
                        term.to_string()
                    } else {
                        format!("{}.{term}", self.table)
                    }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Checks that `name` is a plain or schema-qualified SQL identifier.
///
/// # Errors
///
/// Returns a description of the problem.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty identifier".to_string());
    }
    for part in name.split('.') {
        let mut chars = part.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(format!("invalid identifier: {name:?}"));
        }
    }
    Ok(())
}

/// Checks an `ORDER BY` clause: identifiers with optional `ASC`/`DESC`.
///
/// # Errors
///
/// Returns a description of the problem.
pub fn validate_order(order: &str) -> Result<(), String> {
    for term in order.split(',') {
        let mut words = term.split_whitespace();
        match words.next() {
            Some(col) => validate_identifier(col)?,
            None => return Err(format!("invalid order clause: {order:?}")),
        }
        match words.next() {
            None => {}
            Some(dir) if dir.eq_ignore_ascii_case("asc") || dir.eq_ignore_ascii_case("desc") => {}
            Some(_) => return Err(format!("invalid order clause: {order:?}")),
        }
        if words.next().is_some() {
            return Err(format!("invalid order clause: {order:?}"));
        }
    }
    Ok(())
}

/// Quotes a string as an SQL literal, doubling single quotes.
#[must_use]
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
