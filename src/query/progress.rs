//! Progress reporting for a run.
//!
//! The dispatcher calls [`ProgressSink::increment`] once per finished target
//! and [`ProgressSink::done`] once at the end. Sinks never fail the run.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Receives per-target completion ticks.
pub trait ProgressSink: Send + Sync {
    /// One more target finished, successfully or not.
    fn increment(&self);

    /// Every target finished.
    fn done(&self);
}

/// A sink that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn increment(&self) {}

    fn done(&self) {}
}

/// Writes `<name> : <n>/<total> (<pct>%)` lines to a writer.
pub struct ProgressReporter {
    name: String,
    total: usize,
    completed: AtomicUsize,
    started: Instant,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ProgressReporter {
    /// Creates a reporter for `total` targets writing to `writer`.
    pub fn new(name: impl Into<String>, total: usize, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            total,
            completed: AtomicUsize::new(0),
            started: Instant::now(),
            writer: Mutex::new(writer),
        }
    }

    /// Creates a reporter writing to stderr.
    pub fn stderr(name: impl Into<String>, total: usize) -> Self {
        Self::new(name, total, Box::new(std::io::stderr()))
    }

    fn write_line(writer: &mut dyn Write, line: &str) {
        // Progress output is best effort.
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }
}

impl ProgressSink for ProgressReporter {
    fn increment(&self) {
        // Counting under the writer lock keeps the lines in order.
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = if self.total == 0 {
            100
        } else {
            completed * 100 / self.total
        };
        Self::write_line(
            writer.as_mut(),
            &format!("{} : {completed}/{} ({percent}%)", self.name, self.total),
        );
    }

    fn done(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        Self::write_line(
            writer.as_mut(),
            &format!(
                "{} : done in {} ms",
                self.name,
                self.started.elapsed().as_millis()
            ),
        );
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("name", &self.name)
            .field("total", &self.total)
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .finish()
    }
}
