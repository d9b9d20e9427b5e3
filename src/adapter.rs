//! Boundary with the database driver.
//!
//! A [`Connection`] executes raw SQL and escapes literals; the
//! [`DriverResult`] it returns is a forward-only row stream. The engine never
//! hands a driver result to callers directly: it drains it once into a
//! [`ResultSet`], which is what gets cached and shared between cursors.

use crate::value::{Row, Value};

/// A raw SQL connection.
pub trait Connection: Send + Sync {
    /// Run `sql`. `None` signals failure; the reason is then available from
    /// [`Connection::last_error`].
    fn execute(&self, sql: &str) -> Option<Box<dyn DriverResult>>;

    /// Escape a value for inclusion inside a SQL literal. The result is not
    /// quoted.
    fn escape(&self, value: &Value) -> String;

    /// Diagnostic text of the most recent failure.
    fn last_error(&self) -> String;
}

/// Native, forward-only result handle.
pub trait DriverResult: Send {
    /// Next row as an ordered field map, or `None` when exhausted.
    fn fetch_row_as_map(&mut self) -> Option<Row>;

    /// Next row as a record. Drivers without a distinct object form share the
    /// map form.
    fn fetch_row_as_object(&mut self) -> Option<Row> {
        self.fetch_row_as_map()
    }

    fn affected_rows(&self) -> u64;

    fn last_insert_id(&self) -> i64;
}

/// Fully buffered snapshot of a driver result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Row>,
    affected_rows: u64,
    last_insert_id: i64,
}

impl ResultSet {
    /// Drain `result` to exhaustion. Counters are read before the first row
    /// is fetched.
    pub fn from_driver(mut result: Box<dyn DriverResult>) -> Self {
        let affected_rows = result.affected_rows();
        let last_insert_id = result.last_insert_id();
        let mut rows = Vec::new();
        while let Some(row) = result.fetch_row_as_object() {
            rows.push(row);
        }
        Self {
            rows,
            affected_rows,
            last_insert_id,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }
}
