//! Query execution with a shared result cache.
//!
//! A [`Query`] parses a template, serves SELECT-class statements from the
//! [`QueryRegistry`] cache when it can, and otherwise executes through its
//! [`Connection`]. Any statement that is not SELECT-class clears the whole
//! cache, since a write may invalidate any number of cached reads.

use crate::adapter::{Connection, ResultSet};
use crate::error::{Error, Result};
use crate::parser::QueryParser;
use crate::result::QueryResult;
use crate::value::Params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};

/// Engine behaviour switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Store SELECT results in the shared cache
    #[serde(default = "default_true")]
    pub cache_results: bool,
    /// Emit every parsed query at debug level
    #[serde(default)]
    pub log_sql: bool,
}

fn default_true() -> bool {
    true
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_results: true,
            log_sql: false,
        }
    }
}

impl QueryConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

/// One entry of the execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedQuery {
    pub sql: String,
    /// Served from the result cache without touching the connection
    pub cached: bool,
}

/// State shared by every [`Query`] built from it: the result cache and the
/// execution log.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    cache: Mutex<CacheState>,
    log: RwLock<Vec<LoggedQuery>>,
}

/// Cached results plus the number of times the cache has been cleared.
/// A result computed before a clear must not be stored after it.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Arc<ResultSet>>,
    generation: u64,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_cache(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, key: &str) -> Option<Arc<ResultSet>> {
        self.lock_cache().entries.get(key).cloned()
    }

    /// Current invalidation generation. Capture it before executing a read
    /// and hand it back to [`QueryRegistry::store`].
    fn generation(&self) -> u64 {
        self.lock_cache().generation
    }

    /// Store `result` unless the cache was cleared since `generation` was
    /// read.
    fn store(&self, key: String, result: Arc<ResultSet>, generation: u64) {
        let mut cache = self.lock_cache();
        if cache.generation != generation {
            trace!("discarding result for {} read before a write", key);
            return;
        }
        cache.entries.insert(key, result);
    }

    pub fn clear_cache(&self) {
        let mut cache = self.lock_cache();
        if !cache.entries.is_empty() {
            trace!("clearing {} cached result(s)", cache.entries.len());
        }
        cache.entries.clear();
        cache.generation += 1;
    }

    pub fn cached_count(&self) -> usize {
        self.lock_cache().entries.len()
    }

    fn record(&self, sql: &str, cached: bool) {
        self.log
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(LoggedQuery {
                sql: sql.to_string(),
                cached,
            });
    }

    /// Number of queries sent to the connection. Cache hits are not counted.
    pub fn query_count(&self) -> usize {
        self.execution_count()
    }

    /// Parsed text of every query sent to the connection, in order
    pub fn query_list(&self) -> Vec<String> {
        self.log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|q| !q.cached)
            .map(|q| q.sql.clone())
            .collect()
    }

    /// Full log including cache-hit flags
    pub fn log_entries(&self) -> Vec<LoggedQuery> {
        self.log.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of queries that went to the connection
    pub fn execution_count(&self) -> usize {
        self.log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|q| !q.cached)
            .count()
    }
}

/// Snapshot of the engine state that produced a [`QueryResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    pub template: String,
    pub parsed_query: String,
    pub from_cache: bool,
}

fn cache_key(parsed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parsed.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_select(parsed: &str) -> bool {
    parsed
        .trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

/// Turns SQL templates into [`QueryResult`]s.
pub struct Query {
    connection: Arc<dyn Connection>,
    parser: QueryParser,
    registry: Arc<QueryRegistry>,
    template: Option<String>,
    parsed_query: Option<String>,
    is_select: Option<(String, bool)>,
    disable_cache: bool,
    log_sql: bool,
}

impl Query {
    pub fn new(
        connection: Arc<dyn Connection>,
        parser: QueryParser,
        registry: Arc<QueryRegistry>,
    ) -> Self {
        Self {
            connection,
            parser,
            registry,
            template: None,
            parsed_query: None,
            is_select: None,
            disable_cache: false,
            log_sql: false,
        }
    }

    /// Build an engine that applies `config`.
    pub fn with_config(
        connection: Arc<dyn Connection>,
        registry: Arc<QueryRegistry>,
        config: &QueryConfig,
    ) -> Self {
        let mut query = Self::new(connection, QueryParser::new(), registry);
        query.disable_cache = !config.cache_results;
        query.log_sql = config.log_sql;
        query
    }

    /// Store a template for later [`Query::rerun`] calls.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Run the same query against a different connection.
    pub fn set_connection(&mut self, connection: Arc<dyn Connection>) {
        self.connection = connection;
    }

    /// Stop storing results in the cache. Cached reads still apply.
    pub fn disable_cache(&mut self) {
        self.disable_cache = true;
    }

    pub fn parsed_query(&self) -> Option<&str> {
        self.parsed_query.as_deref()
    }

    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    pub fn query_count(&self) -> usize {
        self.registry.query_count()
    }

    pub fn query_list(&self) -> Vec<String> {
        self.registry.query_list()
    }

    /// Parse `template` with `params`, then execute or serve it from cache.
    pub fn run(&mut self, template: &str, params: &Params) -> Result<QueryResult> {
        self.template = Some(template.to_string());
        self.execute(template, params)
    }

    /// Run the stored template again with new params. Fails with
    /// [`Error::MissingTemplate`] when no template has been set or run yet.
    pub fn rerun(&mut self, params: &Params) -> Result<QueryResult> {
        let template = self.template.clone().ok_or(Error::MissingTemplate)?;
        self.execute(&template, params)
    }

    fn execute(&mut self, template: &str, params: &Params) -> Result<QueryResult> {
        let parsed = self.parser.parse(template, params, self.connection.as_ref())?;
        if self.log_sql {
            debug!("sql: {}", parsed.trim());
        }
        let key = cache_key(&parsed);
        self.parsed_query = Some(parsed.clone());

        if let Some(result) = self.registry.cached(&key) {
            trace!("cache hit for {}", key);
            self.registry.record(&parsed, true);
            return Ok(self.wrap(template, &parsed, result, true));
        }

        let generation = self.registry.generation();
        let driver = self.connection.execute(&parsed);
        self.registry.record(&parsed, false);
        let Some(driver) = driver else {
            let message = self.connection.last_error();
            warn!("query failed: {}", message);
            return Err(Error::QueryExecution {
                message,
                template: template.to_string(),
            });
        };

        let result = Arc::new(ResultSet::from_driver(driver));
        if !self.is_select(&parsed) {
            self.registry.clear_cache();
        } else if !self.disable_cache {
            self.registry.store(key, Arc::clone(&result), generation);
        }

        Ok(self.wrap(template, &parsed, result, false))
    }

    /// Memoized for the most recent parsed query.
    fn is_select(&mut self, parsed: &str) -> bool {
        if let Some((sql, select)) = &self.is_select {
            if sql == parsed {
                return *select;
            }
        }
        let select = is_select(parsed);
        self.is_select = Some((parsed.to_string(), select));
        select
    }

    fn wrap(
        &self,
        template: &str,
        parsed: &str,
        result: Arc<ResultSet>,
        from_cache: bool,
    ) -> QueryResult {
        let state = QueryState {
            template: template.to_string(),
            parsed_query: parsed.to_string(),
            from_cache,
        };
        QueryResult::new(result, state)
    }
}
