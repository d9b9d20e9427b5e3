mod common;

use common::{query_over, row, MockConnection, VersionedConnection};
use rust_db::{Error, Params, Query, QueryConfig, QueryParser, QueryRegistry, Value};
use std::sync::Arc;

fn users() -> Vec<rust_db::Row> {
    vec![
        row(&[("id", Value::from(1)), ("name", Value::from("a"))]),
        row(&[("id", Value::from(2)), ("name", Value::from("b"))]),
    ]
}

#[test]
fn repeated_select_is_served_from_cache() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    let first = query.run("SELECT * FROM users", &Params::new()).unwrap();
    let second = query.run("  SELECT * FROM users \n", &Params::new()).unwrap();

    assert_eq!(conn.executions(), 1);
    assert!(!first.query().from_cache);
    assert!(second.query().from_cache);
    assert_eq!(second.len(), 2);
    assert_eq!(query.registry().cached_count(), 1);
}

#[test]
fn differently_bound_templates_are_cached_separately() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    query.run("SELECT * FROM users WHERE id = ?i", &Params::positional([1])).unwrap();
    query.run("SELECT * FROM users WHERE id = ?i", &Params::positional([2])).unwrap();
    query.run("SELECT * FROM users WHERE id = 1", &Params::new()).unwrap();

    assert_eq!(conn.executions(), 2);
    assert_eq!(query.registry().cached_count(), 2);
}

#[test]
fn writes_clear_the_whole_cache() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    query.run("SELECT * FROM users", &Params::new()).unwrap();
    query.run("SELECT id FROM users", &Params::new()).unwrap();
    assert_eq!(query.registry().cached_count(), 2);

    let update = query
        .run("UPDATE users SET name = :name?s", &Params::new().with_value("name", "c"))
        .unwrap();
    assert_eq!(update.affected(), 3);
    assert_eq!(query.registry().cached_count(), 0);

    query.run("SELECT * FROM users", &Params::new()).unwrap();
    assert_eq!(conn.executions(), 4);
}

#[test]
fn select_classification_is_case_insensitive() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    query.run("\n\tselect * FROM users", &Params::new()).unwrap();
    query.run("SeLeCt * FROM users", &Params::new()).unwrap();
    assert_eq!(query.registry().cached_count(), 2);

    query.run("WITH x AS (SELECT 1) SELECT * FROM x", &Params::new()).unwrap();
    assert_eq!(query.registry().cached_count(), 0);
}

#[test]
fn disabled_cache_still_reads_but_never_stores() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let registry = Arc::new(QueryRegistry::new());
    let mut caching = Query::new(conn.clone(), QueryParser::new(), registry.clone());
    let mut uncached = Query::new(conn.clone(), QueryParser::new(), registry.clone());
    uncached.disable_cache();

    uncached.run("SELECT name FROM users", &Params::new()).unwrap();
    uncached.run("SELECT name FROM users", &Params::new()).unwrap();
    assert_eq!(conn.executions(), 2);
    assert_eq!(registry.cached_count(), 0);

    caching.run("SELECT * FROM users", &Params::new()).unwrap();
    let hit = uncached.run("SELECT * FROM users", &Params::new()).unwrap();
    assert!(hit.query().from_cache);
    assert_eq!(conn.executions(), 3);
}

#[test]
fn config_can_turn_caching_off() {
    let config = QueryConfig::from_toml("cache_results = false\nlog_sql = true\n").unwrap();
    assert!(!config.cache_results);
    assert!(config.log_sql);

    let conn = Arc::new(MockConnection::with_rows(users()));
    let registry = Arc::new(QueryRegistry::new());
    let mut query = Query::with_config(conn.clone(), registry.clone(), &config);
    query.run("SELECT * FROM users", &Params::new()).unwrap();
    query.run("SELECT * FROM users", &Params::new()).unwrap();
    assert_eq!(conn.executions(), 2);

    assert_eq!(QueryConfig::from_toml("").unwrap(), QueryConfig::default());
    assert!(matches!(
        QueryConfig::from_toml("cache_results = 3"),
        Err(Error::Config(_))
    ));
}

#[test]
fn failed_execution_carries_diagnostics() {
    let conn = Arc::new(MockConnection::with_rows(users()).failing_on("broken"));
    let mut query = query_over(conn.clone());

    let err = query
        .run("SELECT * FROM broken WHERE id = ?i", &Params::positional([9]))
        .unwrap_err();
    match err {
        Error::QueryExecution { message, template } => {
            assert_eq!(message, "mock failure");
            assert_eq!(template, "SELECT * FROM broken WHERE id = ?i");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(query.registry().cached_count(), 0);
    assert_eq!(query.query_count(), 1);
}

#[test]
fn parse_errors_never_reach_the_connection() {
    let conn = Arc::new(MockConnection::new());
    let mut query = query_over(conn.clone());

    let err = query.run("SELECT :missing", &Params::new()).unwrap_err();
    assert!(err.is_parse_error());
    assert_eq!(conn.executions(), 0);
    assert_eq!(query.query_count(), 0);
}

#[test]
fn query_list_holds_executed_queries_and_log_flags_cache_hits() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    query.run("SELECT * FROM users WHERE id = ?i", &Params::positional([1])).unwrap();
    query.run("SELECT * FROM users WHERE id = ?i", &Params::positional([1])).unwrap();
    query.run("DELETE FROM users", &Params::new()).unwrap();

    assert_eq!(
        query.query_list(),
        vec!["SELECT * FROM users WHERE id = 1", "DELETE FROM users"]
    );
    assert_eq!(query.query_count(), 2);
    assert_eq!(query.query_list(), conn.executed());

    let entries = query.registry().log_entries();
    assert_eq!(entries.len(), 3);
    let flags: Vec<bool> = entries.iter().map(|q| q.cached).collect();
    assert_eq!(flags, vec![false, true, false]);
    assert_eq!(entries[1].sql, "SELECT * FROM users WHERE id = 1");
}

#[test]
fn rerun_reuses_the_stored_template() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let registry = Arc::new(QueryRegistry::new());
    let mut query = Query::new(conn.clone(), QueryParser::new(), registry)
        .with_template("SELECT * FROM users WHERE id = :id?i");

    query.rerun(&Params::new().with_value("id", 7)).unwrap();
    assert_eq!(query.parsed_query(), Some("SELECT * FROM users WHERE id = 7"));

    query.run("SELECT 1", &Params::new()).unwrap();
    query.rerun(&Params::new()).unwrap();
    assert_eq!(query.parsed_query(), Some("SELECT 1"));
}

#[test]
fn rerun_without_a_template_is_rejected() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(conn.clone());

    let err = query.rerun(&Params::new()).unwrap_err();
    assert!(matches!(err, Error::MissingTemplate));
    assert!(err.is_parse_error());
    assert_eq!(conn.executions(), 0);
    assert_eq!(query.query_count(), 0);
    assert!(query.registry().log_entries().is_empty());
    assert_eq!(query.parsed_query(), None);
}

#[test]
fn set_connection_switches_the_target() {
    let first = Arc::new(MockConnection::with_rows(users()));
    let second = Arc::new(MockConnection::with_rows(users()));
    let mut query = query_over(first.clone());

    query.run("UPDATE users SET a = 1", &Params::new()).unwrap();
    query.set_connection(second.clone());
    query.run("UPDATE users SET a = 1", &Params::new()).unwrap();

    assert_eq!(first.executions(), 1);
    assert_eq!(second.executions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_registry_across_threads() {
    let conn = Arc::new(MockConnection::with_rows(users()));
    let registry = Arc::new(QueryRegistry::new());

    let mut handles = Vec::new();
    for i in 0..8 {
        let conn = conn.clone();
        let registry = registry.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut query = Query::new(conn, QueryParser::new(), registry);
            for _ in 0..10 {
                query
                    .run("SELECT * FROM users WHERE id = ?i", &Params::positional([i % 2]))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.log_entries().len(), 80);
    assert_eq!(registry.cached_count(), 2);
    assert_eq!(registry.query_count(), conn.executions());
    assert_eq!(registry.query_list().len(), conn.executions());
}

#[test]
fn write_during_an_in_flight_read_keeps_the_stale_read_out_of_the_cache() {
    let conn = Arc::new(VersionedConnection::new());
    let registry = Arc::new(QueryRegistry::new());
    conn.hold_next_select();

    let reader = {
        let conn = conn.clone();
        let registry = registry.clone();
        std::thread::spawn(move || {
            let mut query = Query::new(conn, QueryParser::new(), registry);
            query.run("SELECT v FROM counter", &Params::new()).unwrap().value().unwrap()
        })
    };

    conn.wait_for_held_select();
    let mut writer = Query::new(conn.clone(), QueryParser::new(), registry.clone());
    writer.run("UPDATE counter SET v = v + 1", &Params::new()).unwrap();
    conn.release_held_select();

    assert_eq!(reader.join().unwrap(), Value::Integer(0));
    assert_eq!(registry.cached_count(), 0);

    let fresh = writer.run("SELECT v FROM counter", &Params::new()).unwrap();
    assert!(!fresh.query().from_cache);
    assert_eq!(fresh.value().unwrap(), Value::Integer(1));
    assert_eq!(conn.selects(), 2);

    let again = writer.run("SELECT v FROM counter", &Params::new()).unwrap();
    assert!(again.query().from_cache);
    assert_eq!(again.value().unwrap(), Value::Integer(1));
}
