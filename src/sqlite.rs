use crate::adapter::{Connection, DriverResult};
use crate::error::Result;
use crate::value::{Row, Value};
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Statements run once when the connection is opened
    #[serde(default)]
    pub schema: Vec<String>,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema statements
    pub fn new(db_path: impl Into<String>, schema: Vec<String>) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:", Vec::new())
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// [`Connection`] over a rusqlite handle.
pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    last_error: Mutex<String>,
}

impl SqliteConnection {
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        debug!("opening sqlite database at path: {}", config.db_path);
        let conn = if config.db_path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(&config.db_path)?
        };
        initialize_schema(&conn, &config.schema)?;
        Ok(Self::from_raw(conn))
    }

    pub fn from_raw(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            last_error: Mutex::new(String::new()),
        }
    }

    fn run(&self, sql: &str) -> rusqlite::Result<SqliteResult> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            let affected = stmt.execute([])?;
            return Ok(SqliteResult {
                rows: VecDeque::new(),
                affected_rows: affected as u64,
                last_insert_id: conn.last_insert_rowid(),
            });
        }

        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let mut rows = VecDeque::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_sql(row.get_ref(i)?));
            }
            rows.push_back(Row::new(Arc::clone(&columns), values));
        }
        drop(cursor);
        Ok(SqliteResult {
            affected_rows: rows.len() as u64,
            rows,
            last_insert_id: conn.last_insert_rowid(),
        })
    }
}

fn initialize_schema(conn: &rusqlite::Connection, schema: &[String]) -> rusqlite::Result<()> {
    for sql in schema {
        conn.execute_batch(sql)?;
    }
    Ok(())
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl Connection for SqliteConnection {
    fn execute(&self, sql: &str) -> Option<Box<dyn DriverResult>> {
        match self.run(sql) {
            Ok(result) => Some(Box::new(result)),
            Err(e) => {
                warn!("sqlite execution failed: {}", e);
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = e.to_string();
                None
            }
        }
    }

    fn escape(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => (*b as i64).to_string(),
            other => other.to_text().replace('\'', "''"),
        }
    }

    fn last_error(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Rows produced by one SQLite statement.
pub struct SqliteResult {
    rows: VecDeque<Row>,
    affected_rows: u64,
    last_insert_id: i64,
}

impl DriverResult for SqliteResult {
    fn fetch_row_as_map(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }
}
