//! Progress reporting and cooperative cancellation for long-running stages

use crate::types::{QaError, QaResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receiver of coarse-grained progress updates.
///
/// `fraction` is in [0, 1] and never decreases within one stage.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, label: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) + Send + Sync,
{
    fn report(&self, fraction: f64, label: &str) {
        self(fraction, label)
    }
}

/// Discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64, _label: &str) {}
}

/// Forwards progress updates to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, fraction: f64, label: &str) {
        log::info!("{}: {:.0}%", label, fraction * 100.0);
    }
}

/// Shared flag requesting early termination of a stage
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`QaError::Cancelled`] if cancellation was requested
    pub fn check(&self, stage: &str) -> QaResult<()> {
        if self.is_cancelled() {
            log::warn!("{} cancelled", stage);
            Err(QaError::Cancelled(stage.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Counts finished work units and reports them in order
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    label: &'a str,
    total: usize,
    done: Mutex<usize>,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, label: &'a str, total: usize) -> Self {
        Self {
            sink,
            label,
            total,
            done: Mutex::new(0),
        }
    }

    pub(crate) fn start(&self) {
        self.sink.report(0.0, self.label);
    }

    /// Mark one unit finished.
    ///
    /// The report is issued while holding the counter lock so that
    /// concurrent workers cannot deliver fractions out of order.
    pub(crate) fn advance(&self) {
        let mut done = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *done += 1;
        let fraction = if self.total == 0 {
            1.0
        } else {
            (*done).min(self.total) as f64 / self.total as f64
        };
        self.sink.report(fraction, self.label);
    }
}
