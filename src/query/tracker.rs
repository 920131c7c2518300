//! Concurrency accounting for one run.

use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    current: usize,
    high_water_mark: usize,
}

/// Tracks how many targets are being worked on, and the peak of that count.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    counters: Mutex<Counters>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one target as active until the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        let mut counters = self.lock();
        counters.current += 1;
        counters.high_water_mark = counters.high_water_mark.max(counters.current);

        ActiveGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Number of targets currently active.
    pub fn current(&self) -> usize {
        self.lock().current
    }

    /// Largest number of simultaneously active targets seen so far.
    pub fn high_water_mark(&self) -> usize {
        self.lock().high_water_mark
    }

    fn exit(&self) {
        let mut counters = self.lock();
        counters.current = counters.current.saturating_sub(1);
    }

    // A panicking target never holds this lock, so poisoning carries no broken state.
    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps one target counted as active. Dropping it decrements `current`.
#[derive(Debug)]
pub struct ActiveGuard {
    tracker: Arc<ConcurrencyTracker>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}
