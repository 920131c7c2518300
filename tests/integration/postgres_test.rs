//! PostgreSQL integration tests.
//!
//! These tests require a running PostgreSQL server and are skipped unless
//! PGHOST and PGDATABASE are set. Credentials come from PGUSER/PGPASSWORD.

use std::sync::Arc;

use db_fanout::config::{ConnectionSettings, Parameters};
use db_fanout::db::{PostgresConnector, SemanticType, Value};
use db_fanout::error::FanoutError;
use db_fanout::query::{Dispatcher, MessageCaptureLayer};
use db_fanout::target::Target;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Helper to get the test target from the environment.
fn get_test_target() -> Option<Target> {
    let host = std::env::var("PGHOST").ok()?;
    let database = std::env::var("PGDATABASE").ok()?;
    Some(Target::new(host, database))
}

fn connector() -> Arc<PostgresConnector> {
    let mut settings = ConnectionSettings::default();
    settings.apply_env_defaults();
    Arc::new(PostgresConnector::new(settings))
}

#[tokio::test]
async fn test_typed_result_sets() {
    let Some(target) = get_test_target() else {
        eprintln!("Skipping test: PGHOST/PGDATABASE not set");
        return;
    };

    let params = Parameters::new(
        "SELECT 1::int4 AS n, 2.5::float8 AS f, true AS b, 'x'::text AS t, NULL::text AS missing, '\\x0102'::bytea AS raw;
         SELECT generate_series(1, 3) AS s",
    );

    let outcome = Dispatcher::new(connector(), params)
        .run(vec![target])
        .await;

    assert!(outcome.all_succeeded(), "{:?}", outcome.failures);
    let tables = &outcome.results[0].tables;
    assert_eq!(tables.len(), 2);

    let first = &tables[0];
    assert_eq!(
        first.columns.iter().map(|c| c.data_type).collect::<Vec<_>>(),
        vec![
            SemanticType::Integer,
            SemanticType::Float,
            SemanticType::Boolean,
            SemanticType::Text,
            SemanticType::Text,
            SemanticType::Binary,
        ]
    );
    assert_eq!(
        first.rows[0],
        vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::Bool(true),
            Value::String("x".into()),
            Value::Null,
            Value::Bytes(vec![1, 2]),
        ]
    );
    assert_eq!(tables[1].row_count(), 3);
}

#[tokio::test]
async fn test_same_target_twice_in_parallel() {
    let Some(target) = get_test_target() else {
        eprintln!("Skipping test: PGHOST/PGDATABASE not set");
        return;
    };

    let params = Parameters {
        parallelism: 2,
        ..Parameters::new("SELECT pg_sleep(0.1), current_database()")
    };

    let outcome = Dispatcher::new(connector(), params)
        .run(vec![target.clone(), target])
        .await;

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.high_water_mark <= 2);
}

#[tokio::test]
async fn test_server_error_is_command_failure() {
    let Some(target) = get_test_target() else {
        eprintln!("Skipping test: PGHOST/PGDATABASE not set");
        return;
    };

    let outcome = Dispatcher::new(
        connector(),
        Parameters::new("SELECT * FROM table_that_does_not_exist"),
    )
    .run(vec![target])
    .await;

    assert_eq!(outcome.failures.len(), 1);
    let error = &outcome.failures[0].error;
    assert!(matches!(error, FanoutError::Command(_)));
    assert!(error.to_string().contains("42P01"));
}

#[tokio::test]
async fn test_notices_are_captured() {
    let Some(target) = get_test_target() else {
        eprintln!("Skipping test: PGHOST/PGDATABASE not set");
        return;
    };

    // The current-thread runtime keeps every poll on this thread.
    let subscriber = Registry::default().with(MessageCaptureLayer::filtered());
    let _default = tracing::subscriber::set_default(subscriber);

    let params = Parameters {
        show_information_messages: true,
        sequential: true,
        ..Parameters::new(
            "DO $$ BEGIN RAISE NOTICE 'hello from the server'; END $$; SELECT 1 AS one",
        )
    };

    let outcome = Dispatcher::new(connector(), params)
        .run(vec![target])
        .await;

    assert!(outcome.all_succeeded(), "{:?}", outcome.failures);
    let result = &outcome.results[0];
    let messages = result.information_messages().unwrap();
    assert_eq!(messages.row_count(), 1);
    assert_eq!(messages.rows[0][0], Value::String("NOTICE".into()));
    assert_eq!(
        messages.rows[0][5],
        Value::String("hello from the server".into())
    );
    assert_eq!(result.tables.len(), 2);
}
