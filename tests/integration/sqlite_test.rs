//! SQLite integration tests.
//!
//! Each target is a separate SQLite file in a temporary directory, so the
//! full dispatch path runs against real connections without a server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use db_fanout::config::Parameters;
use db_fanout::db::{SemanticType, SqliteConnector, Table, Value};
use db_fanout::error::FanoutError;
use db_fanout::query::Dispatcher;
use db_fanout::target::Target;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;

async fn create_shop(path: &Path, customers: &[&str]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();

    sqlx::raw_sql(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, vip BOOLEAN, joined DATE)",
    )
    .execute(&mut conn)
    .await
    .unwrap();

    for (i, name) in customers.iter().enumerate() {
        sqlx::query("INSERT INTO customers (id, name, vip, joined) VALUES (?, ?, ?, ?)")
            .bind(i as i64 + 1)
            .bind(*name)
            .bind(i % 2 == 0)
            .bind("2024-01-15")
            .execute(&mut conn)
            .await
            .unwrap();
    }

    conn.close().await.unwrap();
}

struct Shops {
    _dir: tempfile::TempDir,
    targets: Vec<Target>,
}

/// Creates three shop databases with 3, 1 and 0 customers.
async fn shops() -> Shops {
    let dir = tempfile::tempdir().unwrap();
    let layout: [(&str, &[&str]); 3] = [
        ("north", &["ada", "grace", "linus"]),
        ("south", &["ken"]),
        ("west", &[]),
    ];

    let mut targets = Vec::new();
    for (name, customers) in layout {
        let path = dir.path().join(format!("{name}.db"));
        create_shop(&path, customers).await;
        targets.push(Target::new(name, path_str(&path)));
    }

    Shops { _dir: dir, targets }
}

fn path_str(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn dispatcher(params: Parameters) -> Dispatcher {
    Dispatcher::new(Arc::new(SqliteConnector::new()), params)
}

#[tokio::test]
async fn test_query_every_shop() {
    let shops = shops().await;
    let params = Parameters {
        sequential: true,
        ..Parameters::new("SELECT id, name, vip, joined FROM customers ORDER BY id")
    };

    let outcome = dispatcher(params).run(shops.targets.clone()).await;

    assert!(outcome.all_succeeded());
    let counts: Vec<usize> = outcome
        .results
        .iter()
        .map(|r| r.tables[0].row_count())
        .collect();
    assert_eq!(counts, vec![3, 1, 0]);
    let west: Vec<&str> = outcome.results[2].tables[0]
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(west, vec!["id", "name", "vip", "joined"]);

    let north = &outcome.results[0].tables[0];
    assert_eq!(
        north.columns.iter().map(|c| c.data_type).collect::<Vec<_>>(),
        vec![
            SemanticType::Integer,
            SemanticType::Text,
            SemanticType::Boolean,
            SemanticType::DateTime,
        ]
    );
    assert_eq!(
        north.rows[0],
        vec![
            Value::Int(1),
            Value::String("ada".into()),
            Value::Bool(true),
            Value::DateTime("2024-01-15".into()),
        ]
    );
}

#[tokio::test]
async fn test_multi_statement_batch_in_parallel() {
    let shops = shops().await;
    let params = Parameters {
        parallelism: 2,
        ..Parameters::new(
            "UPDATE customers SET vip = 1;
             SELECT count(*) AS total FROM customers;
             SELECT name FROM customers WHERE name = 'nobody';",
        )
    };

    let outcome = dispatcher(params).run(shops.targets.clone()).await;

    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.high_water_mark <= 2);
    for result in &outcome.results {
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0].row_count(), 1);
        assert_eq!(result.tables[1].row_count(), 0);
        assert_eq!(result.tables[1].columns[0].name, "name");
    }
}

#[tokio::test]
async fn test_discard_mode_counts_rows() {
    let shops = shops().await;
    let params = Parameters {
        discard_results: true,
        sequential: true,
        ..Parameters::new("SELECT * FROM customers")
    };

    let outcome = dispatcher(params).run(shops.targets.clone()).await;

    let summaries: Vec<&Table> = outcome.results.iter().map(|r| &r.tables[0]).collect();
    assert_eq!(summaries[0], &Table::result_summary(4, 3));
    assert_eq!(summaries[1], &Table::result_summary(4, 1));
    assert_eq!(summaries[2], &Table::result_summary(4, 0));
}

#[tokio::test]
async fn test_missing_and_broken_targets_fail_alone() {
    let shops = shops().await;
    let mut targets = shops.targets.clone();
    targets.push(Target::new("ghost", "/nonexistent/dir/ghost.db"));

    let outcome = dispatcher(Parameters::new("SELECT name FROM customers"))
        .run(targets)
        .await;

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target.server, "ghost");
    assert!(matches!(
        outcome.failures[0].error,
        FanoutError::Connection(_)
    ));
}

#[tokio::test]
async fn test_syntax_error_is_command_failure_per_target() {
    let shops = shops().await;

    let outcome = dispatcher(Parameters::new("SELEKT name FROM customers"))
        .run(shops.targets.clone())
        .await;

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.failures.len(), 3);
    assert!(outcome
        .failures
        .iter()
        .all(|f| matches!(f.error, FanoutError::Command(_))));
}
