//! Runs one command against every target.
//!
//! Targets are processed one at a time in order, or by a bounded pool of
//! tokio tasks. Each target gets its own connection, and any failure
//! (including a panic in its driver) is recorded against that target only.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::materializer::ResultMaterializer;
use super::progress::{NoProgress, ProgressSink};
use super::tracker::ConcurrencyTracker;
use super::within;
use crate::config::Parameters;
use crate::db::{Connector, ExecutionResult};
use crate::error::{FanoutError, Result};
use crate::target::Target;

/// A target that did not produce a result.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: Target,
    pub error: FanoutError,
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One entry per successful target. Input order in sequential mode.
    pub results: Vec<ExecutionResult>,
    pub failures: Vec<TargetFailure>,
    pub high_water_mark: usize,
    pub elapsed: Duration,
}

impl BatchOutcome {
    /// Number of targets processed.
    pub fn total(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    /// Returns true if every target succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, target: Target, result: Result<ExecutionResult>) {
        match result {
            Ok(result) => {
                debug!("{} Completed with {} table(s)", target.log_prefix(), result.tables.len());
                self.results.push(result);
            }
            Err(error) => {
                // Per-target failures are connection, command or unexpected.
                let error = if error.is_target_failure() {
                    error
                } else {
                    FanoutError::unexpected(error.to_string())
                };
                error!("{} {error}", target.log_prefix());
                self.failures.push(TargetFailure { target, error });
            }
        }
    }
}

/// Fans a command out to many targets.
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
    params: Arc<Parameters>,
    progress: Arc<dyn ProgressSink>,
}

impl Dispatcher {
    /// Creates a dispatcher that reports no progress.
    pub fn new(connector: Arc<dyn Connector>, params: Parameters) -> Self {
        Self {
            connector,
            params: Arc::new(params),
            progress: Arc::new(NoProgress),
        }
    }

    /// Sets the progress sink.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the command against every target and collects the outcome.
    ///
    /// Never fails: per-target errors are logged and listed in
    /// [`BatchOutcome::failures`].
    pub async fn run(&self, targets: Vec<Target>) -> BatchOutcome {
        let started = Instant::now();
        let worker = TargetWorker {
            connector: Arc::clone(&self.connector),
            params: Arc::clone(&self.params),
            tracker: Arc::new(ConcurrencyTracker::new()),
        };

        let mut outcome = if self.params.sequential {
            self.run_sequential(&worker, targets).await
        } else {
            self.run_parallel(&worker, targets).await
        };

        self.progress.done();

        outcome.high_water_mark = worker.tracker.high_water_mark();
        outcome.elapsed = started.elapsed();
        info!("Maximum concurrent queries: {}", outcome.high_water_mark);
        info!(
            "Finished {} target(s): {} succeeded, {} failed in {} ms",
            outcome.total(),
            outcome.results.len(),
            outcome.failures.len(),
            outcome.elapsed.as_millis()
        );

        outcome
    }

    async fn run_sequential(&self, worker: &TargetWorker, targets: Vec<Target>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for target in targets {
            let result = worker.process(&target).await;
            self.progress.increment();
            outcome.record(target, result);
        }

        outcome
    }

    async fn run_parallel(&self, worker: &TargetWorker, targets: Vec<Target>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let semaphore = Arc::new(Semaphore::new(self.params.parallelism));
        let mut tasks = JoinSet::new();

        for target in targets {
            let worker = worker.clone();
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&self.progress);

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => worker.process(&target).await,
                    Err(e) => Err(FanoutError::unexpected(format!("Worker pool closed: {e}"))),
                };
                progress.increment();
                (target, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((target, result)) => outcome.record(target, result),
                Err(e) => error!("Worker task failed: {e}"),
            }
        }

        outcome
    }
}

/// Per-target work, shared by every task of a run.
#[derive(Clone)]
struct TargetWorker {
    connector: Arc<dyn Connector>,
    params: Arc<Parameters>,
    tracker: Arc<ConcurrencyTracker>,
}

impl TargetWorker {
    /// Processes one target while it is counted as active.
    async fn process(&self, target: &Target) -> Result<ExecutionResult> {
        let _active = self.tracker.enter();

        AssertUnwindSafe(self.run_target(target))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(FanoutError::unexpected(format!(
                    "Worker panicked: {}",
                    panic_message(panic.as_ref())
                )))
            })
    }

    async fn run_target(&self, target: &Target) -> Result<ExecutionResult> {
        let prefix = target.log_prefix();

        let connect_started = Instant::now();
        let connected = within(self.params.connect_timeout, self.connector.connect(target)).await;
        info!(
            "{prefix} Connection time: {} ms",
            connect_started.elapsed().as_millis()
        );
        let mut conn = match connected {
            Some(conn) => conn?,
            None => {
                return Err(FanoutError::connection(format!(
                    "Connection timed out after {}s",
                    secs(self.params.connect_timeout)
                )))
            }
        };

        let query_started = Instant::now();
        let result = ResultMaterializer::new(&self.params)
            .execute(conn.as_mut(), target)
            .await;
        info!(
            "{prefix} Query time: {} ms",
            query_started.elapsed().as_millis()
        );

        match within(self.params.connect_timeout, conn.close()).await {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("{prefix} {e}"),
            None => warn!("{prefix} Timed out closing connection"),
        }

        result
    }
}

fn secs(deadline: Option<Duration>) -> f64 {
    deadline.map(|d| d.as_secs_f64()).unwrap_or_default()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockConnector, MockResultSet, MockScript, TargetConnection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingProgress {
        increments: AtomicUsize,
        done: AtomicUsize,
    }

    impl ProgressSink for CountingProgress {
        fn increment(&self) {
            self.increments.fetch_add(1, Ordering::SeqCst);
        }

        fn done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Connects and ticks recorded into one shared timeline.
    #[derive(Default)]
    struct Timeline(Mutex<Vec<String>>);

    impl Timeline {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for Timeline {
        fn increment(&self) {
            self.push("tick".to_string());
        }

        fn done(&self) {
            self.push("done".to_string());
        }
    }

    struct TimelineConnector {
        inner: MockConnector,
        timeline: Arc<Timeline>,
    }

    #[async_trait]
    impl Connector for TimelineConnector {
        async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>> {
            self.timeline.push(format!("connect {}", target.server));
            self.inner.connect(target).await
        }
    }

    fn targets(servers: &[&str]) -> Vec<Target> {
        servers.iter().map(|s| Target::new(*s, "sales")).collect()
    }

    fn slow_rows() -> MockScript {
        MockScript::returning(vec![MockResultSet::numbered(3)])
            .with_command_delay(Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_parallel_with_one_failure() {
        let connector = MockConnector::new()
            .with_fallback(slow_rows())
            .with_target("b", MockScript::failing_connect("login failed"));
        let progress = Arc::new(CountingProgress::default());
        let params = Parameters {
            parallelism: 2,
            ..Parameters::new("SELECT 1")
        };

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .with_progress(progress.clone())
            .run(targets(&["a", "b", "c"]))
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].target.server, "b");
        assert!(matches!(outcome.failures[0].error, FanoutError::Connection(_)));
        assert!((1..=2).contains(&outcome.high_water_mark));
        assert_eq!(progress.increments.load(Ordering::SeqCst), 3);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_keeps_order() {
        let connector = MockConnector::new().with_fallback(slow_rows());
        let params = Parameters {
            sequential: true,
            ..Parameters::new("SELECT 1")
        };

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .run(targets(&["a", "b", "c", "d"]))
            .await;

        let servers: Vec<_> = outcome
            .results
            .iter()
            .map(|r| r.target.server.as_str())
            .collect();
        assert_eq!(servers, vec!["a", "b", "c", "d"]);
        assert_eq!(outcome.high_water_mark, 1);
    }

    #[tokio::test]
    async fn test_sequential_progress_follows_input_order() {
        let timeline = Arc::new(Timeline::default());
        let connector = TimelineConnector {
            inner: MockConnector::new()
                .with_fallback(slow_rows())
                .with_target("b", MockScript::failing_command("boom")),
            timeline: Arc::clone(&timeline),
        };
        let params = Parameters {
            sequential: true,
            ..Parameters::new("SELECT 1")
        };

        Dispatcher::new(Arc::new(connector), params)
            .with_progress(timeline.clone())
            .run(targets(&["a", "b", "c"]))
            .await;

        assert_eq!(
            timeline.events(),
            vec![
                "connect a", "tick", "connect b", "tick", "connect c", "tick", "done",
            ]
        );
    }

    #[test]
    fn test_non_target_errors_are_recorded_as_unexpected() {
        let mut outcome = BatchOutcome::default();

        outcome.record(
            Target::new("db1", "sales"),
            Err(FanoutError::config("bad settings")),
        );

        assert!(matches!(outcome.failures[0].error, FanoutError::Unexpected(_)));
        assert!(outcome.failures[0].error.to_string().contains("bad settings"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_high_water_mark_bounded_by_parallelism() {
        let connector = MockConnector::new().with_fallback(slow_rows());
        let params = Parameters {
            parallelism: 3,
            ..Parameters::new("SELECT 1")
        };
        let servers: Vec<String> = (0..10).map(|i| format!("db{i}")).collect();
        let servers: Vec<&str> = servers.iter().map(String::as_str).collect();

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .run(targets(&servers))
            .await;

        assert_eq!(outcome.results.len(), 10);
        assert!(outcome.high_water_mark >= 1);
        assert!(outcome.high_water_mark <= 3);
    }

    #[tokio::test]
    async fn test_panicking_target_is_isolated() {
        let connector = MockConnector::new().with_target("boom", MockScript::panicking());
        let progress = Arc::new(CountingProgress::default());

        let outcome = Dispatcher::new(Arc::new(connector), Parameters::new("SELECT 1"))
            .with_progress(progress.clone())
            .run(targets(&["ok1", "boom", "ok2"]))
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert!(matches!(failure.error, FanoutError::Unexpected(_)));
        assert!(failure.error.to_string().contains("mock driver panicked"));
        assert_eq!(progress.increments.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails_only_that_target() {
        let connector = MockConnector::new().with_target(
            "slow",
            MockScript::default().with_connect_delay(Duration::from_millis(500)),
        );
        let params = Parameters {
            connect_timeout: Some(Duration::from_millis(20)),
            ..Parameters::new("SELECT 1")
        };

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .run(targets(&["slow", "fast"]))
            .await;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].target.server, "fast");
        assert!(matches!(outcome.failures[0].error, FanoutError::Connection(_)));
    }

    #[tokio::test]
    async fn test_command_timeout_is_command_failure() {
        let connector = MockConnector::new().with_target(
            "slow",
            slow_rows().with_command_delay(Duration::from_millis(500)),
        );
        let params = Parameters {
            command_timeout: Some(Duration::from_millis(20)),
            ..Parameters::new("SELECT 1")
        };

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .run(targets(&["slow"]))
            .await;

        assert!(outcome.results.is_empty());
        assert!(matches!(outcome.failures[0].error, FanoutError::Command(_)));
    }

    #[tokio::test]
    async fn test_zero_timeouts_disable_deadlines() {
        let connector = MockConnector::new().with_fallback(
            slow_rows()
                .with_connect_delay(Duration::from_millis(30))
                .with_command_delay(Duration::from_millis(30)),
        );
        let params = Parameters {
            connect_timeout: None,
            command_timeout: None,
            ..Parameters::new("SELECT 1")
        };

        let outcome = Dispatcher::new(Arc::new(connector), params)
            .run(targets(&["a", "b"]))
            .await;

        assert!(outcome.all_succeeded());
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_target_list() {
        let progress = Arc::new(CountingProgress::default());

        let outcome = Dispatcher::new(Arc::new(MockConnector::new()), Parameters::new("SELECT 1"))
            .with_progress(progress.clone())
            .run(Vec::new())
            .await;

        assert_eq!(outcome.total(), 0);
        assert_eq!(outcome.high_water_mark, 0);
        assert_eq!(progress.increments.load(Ordering::SeqCst), 0);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
