// Shared test doubles for the integration tests.
#![allow(dead_code)]

use rust_db::{Connection, DriverResult, Params, Query, QueryParser, QueryRegistry, Row, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

/// Connection that answers every SELECT with the same rows and counts
/// physical executions.
pub struct MockConnection {
    rows: Vec<Row>,
    executions: AtomicUsize,
    executed: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            executions: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Fail any statement containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str) -> Option<Box<dyn DriverResult>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(sql.to_string());
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return None;
            }
        }
        let select = sql.trim_start().to_lowercase().starts_with("select");
        Some(Box::new(MockResult {
            rows: if select { self.rows.clone().into() } else { VecDeque::new() },
            affected: if select { self.rows.len() as u64 } else { 3 },
            insert_id: if select { 0 } else { 42 },
        }))
    }

    fn escape(&self, value: &Value) -> String {
        value.to_text().replace('\'', "\\'")
    }

    fn last_error(&self) -> String {
        "mock failure".to_string()
    }
}

/// Connection over a single counter. SELECTs return the current value as
/// column `v`; any other statement increments it. One SELECT can be held
/// after it has read the counter, so a write can land while it is in flight.
pub struct VersionedConnection {
    version: AtomicI64,
    selects: AtomicUsize,
    hold_next_select: AtomicBool,
    reached: Barrier,
    release: Barrier,
}

impl VersionedConnection {
    pub fn new() -> Self {
        Self {
            version: AtomicI64::new(0),
            selects: AtomicUsize::new(0),
            hold_next_select: AtomicBool::new(false),
            reached: Barrier::new(2),
            release: Barrier::new(2),
        }
    }

    /// Block the next SELECT between reading the counter and returning.
    pub fn hold_next_select(&self) {
        self.hold_next_select.store(true, Ordering::SeqCst);
    }

    /// Wait until the held SELECT has read the counter.
    pub fn wait_for_held_select(&self) {
        self.reached.wait();
    }

    /// Let the held SELECT return.
    pub fn release_held_select(&self) {
        self.release.wait();
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }
}

impl Connection for VersionedConnection {
    fn execute(&self, sql: &str) -> Option<Box<dyn DriverResult>> {
        if !sql.trim_start().to_lowercase().starts_with("select") {
            self.version.fetch_add(1, Ordering::SeqCst);
            return Some(Box::new(MockResult {
                rows: VecDeque::new(),
                affected: 1,
                insert_id: 0,
            }));
        }
        let version = self.version.load(Ordering::SeqCst);
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.hold_next_select.swap(false, Ordering::SeqCst) {
            self.reached.wait();
            self.release.wait();
        }
        Some(Box::new(MockResult {
            rows: vec![row(&[("v", Value::from(version))])].into(),
            affected: 1,
            insert_id: 0,
        }))
    }

    fn escape(&self, value: &Value) -> String {
        value.to_text()
    }

    fn last_error(&self) -> String {
        String::new()
    }
}

pub struct MockResult {
    rows: VecDeque<Row>,
    affected: u64,
    insert_id: i64,
}

impl DriverResult for MockResult {
    fn fetch_row_as_map(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    fn affected_rows(&self) -> u64 {
        self.affected
    }

    fn last_insert_id(&self) -> i64 {
        self.insert_id
    }
}

pub fn query_over(conn: Arc<MockConnection>) -> Query {
    Query::new(conn, QueryParser::new(), Arc::new(QueryRegistry::new()))
}

pub fn parse(template: &str, params: &Params) -> rust_db::Result<String> {
    QueryParser::new().parse(template, params, &MockConnection::new())
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
}
