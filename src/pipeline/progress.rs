//! Aggregate progress counters and periodic progress lines

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Point-in-time view of a run's progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    /// Items finished per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time to finish the remaining items at the current rate
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.processed());
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

/// Counts finished items and logs a progress line every `every` items
#[derive(Debug)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    every: usize,
    started: Mutex<Instant>,
}

impl ProgressTracker {
    pub fn new(every: usize) -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            every: every.max(1),
            started: Mutex::new(Instant::now()),
        }
    }

    /// Resets the counters for a run of `total` items
    pub fn begin(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Records one finished item
    pub fn record(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        let snapshot = self.snapshot();
        let processed = snapshot.processed();
        if processed % self.every == 0 || processed == snapshot.total {
            tracing::info!(
                "Progress: {}/{} items ({} failed), {:.2} items/sec, ETA {}",
                processed,
                snapshot.total,
                snapshot.failed,
                snapshot.rate(),
                snapshot.eta().map_or_else(|| "unknown".to_string(), format_eta)
            );
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        }
    }
}

/// Formats a duration as `1h 02m 03s`, `4m 05s`, or `6s`
pub fn format_eta(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
