//! End-to-end dispatch tests against the mock driver.
//!
//! Exercises the public API the binary uses: dispatcher, progress reporter
//! and JSON export.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use db_fanout::config::{Parameters, RunSettings};
use db_fanout::db::{InfoMessage, MockConnector, MockResultSet, MockScript, Table, Value};
use db_fanout::error::FanoutError;
use db_fanout::export::{self, Report};
use db_fanout::query::{Dispatcher, ProgressReporter};
use db_fanout::target::Target;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn fleet(count: usize) -> Vec<Target> {
    (1..=count)
        .map(|i| Target::new(format!("shard{i}"), "orders"))
        .collect()
}

fn connector() -> MockConnector {
    MockConnector::new()
        .with_fallback(
            MockScript::returning(vec![MockResultSet::numbered(4), MockResultSet::numbered(0)])
                .with_command_delay(Duration::from_millis(10)),
        )
        .with_target("shard2", MockScript::failing_connect("no route to host"))
        .with_target(
            "shard4",
            MockScript::failing_command("permission denied for table orders"),
        )
}

#[tokio::test]
async fn test_run_reports_progress_and_failures() {
    let buffer = SharedBuffer::default();
    let targets = fleet(5);
    let progress = Arc::new(ProgressReporter::new(
        "Query",
        targets.len(),
        Box::new(buffer.clone()),
    ));

    let outcome = Dispatcher::new(Arc::new(connector()), Parameters::new("SELECT * FROM orders"))
        .with_progress(progress)
        .run(targets)
        .await;

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.failures.len(), 2);
    assert!(!outcome.all_succeeded());

    let mut failed: Vec<_> = outcome
        .failures
        .iter()
        .map(|f| (f.target.server.as_str(), f.error.category()))
        .collect();
    failed.sort();
    assert_eq!(failed, vec![("shard2", "Connection Error"), ("shard4", "Command Error")]);

    let text = buffer.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[4], "Query : 5/5 (100%)");
    assert!(lines[5].starts_with("Query : done in "));
}

#[tokio::test]
async fn test_every_result_has_both_tables() {
    let outcome = Dispatcher::new(Arc::new(connector()), Parameters::new("SELECT 1"))
        .run(fleet(5))
        .await;

    for result in &outcome.results {
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0].row_count(), 4);
        assert_eq!(result.tables[1].row_count(), 0);
        assert!(result.tables.iter().all(Table::is_consistent));
    }
}

#[tokio::test]
async fn test_sequential_discard_with_messages() {
    let connector = MockConnector::new().with_fallback(
        MockScript::returning(vec![MockResultSet::numbered(7)])
            .with_messages(vec![InfoMessage::new("NOTICE", "vacuum recommended")]),
    );
    let settings = RunSettings {
        query: Some("SELECT * FROM orders".to_string()),
        sequential: true,
        discard_results: true,
        show_information_messages: true,
        ..Default::default()
    };

    let outcome = Dispatcher::new(Arc::new(connector), settings.to_parameters().unwrap())
        .run(fleet(3))
        .await;

    assert_eq!(outcome.high_water_mark, 1);
    let servers: Vec<_> = outcome
        .results
        .iter()
        .map(|r| r.target.server.clone())
        .collect();
    assert_eq!(servers, vec!["shard1", "shard2", "shard3"]);

    for result in &outcome.results {
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0], Table::result_summary(2, 7));
        let messages = result.information_messages().unwrap();
        assert_eq!(messages.rows[0][5], Value::String("vacuum recommended".into()));
    }
}

#[tokio::test]
async fn test_all_targets_failing_still_completes() {
    let connector =
        MockConnector::new().with_fallback(MockScript::failing_connect("server is down"));

    let outcome = Dispatcher::new(Arc::new(connector), Parameters::new("SELECT 1"))
        .run(fleet(4))
        .await;

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.failures.len(), 4);
    assert!(outcome
        .failures
        .iter()
        .all(|f| matches!(f.error, FanoutError::Connection(_))));
}

#[tokio::test]
async fn test_export_after_run() {
    let outcome = Dispatcher::new(Arc::new(connector()), Parameters::new("SELECT 1"))
        .run(fleet(3))
        .await;

    let labels = vec!["orders".to_string(), "returns".to_string()];
    let report = Report {
        labels: &labels,
        ..Report::new(&outcome)
    };
    let mut out = Vec::new();
    export::write_json(&mut out, &report).unwrap();

    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["targets"], 3);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);
    assert_eq!(json["failures"][0]["target"]["server"], "shard2");
    assert_eq!(json["results"][0]["tables"][1]["label"], "returns");
}
