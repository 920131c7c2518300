//! Multi-target query execution for db-fanout.
//!
//! This module isolates per-target orchestration, result materialization,
//! diagnostic message capture and progress accounting from the front end.

mod capture;
mod dispatcher;
mod materializer;
mod progress;
mod tracker;

pub(crate) use capture::MessageVisitor;
pub use capture::{MessageCapture, MessageCaptureLayer, NOTICE_TARGET};
pub use dispatcher::{BatchOutcome, Dispatcher, TargetFailure};
pub use materializer::{MaterializeMode, ResultMaterializer, TableCollector};
pub use progress::{NoProgress, ProgressReporter, ProgressSink};
pub use tracker::{ActiveGuard, ConcurrencyTracker};

use std::future::Future;
use std::time::Duration;

/// Awaits `future`, giving up after `deadline` if one is set.
///
/// Returns `None` when the deadline passed first.
pub(crate) async fn within<F: Future>(deadline: Option<Duration>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
