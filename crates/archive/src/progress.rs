//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Receives progress from an import or export and decides whether it
/// should stop.
///
/// Cancellation is polled between records, books and cover files.
pub trait ProgressListener: Send + Sync {
    /// Set the (estimated) total number of steps.
    fn set_max_steps(&self, steps: usize);
    fn max_steps(&self) -> usize;
    /// Advance by `delta` steps, optionally with a new status message.
    fn advance(&self, delta: usize, message: Option<&str>);
    fn is_cancelled(&self) -> bool;
    /// `Some(true)` for "busy, no known end", `None` to go back to the default.
    fn set_indeterminate(&self, indeterminate: Option<bool>);
    /// Minimum time between two progress updates for fast-moving loops.
    fn min_update_interval(&self) -> Duration;
}

/// A headless [`ProgressListener`] that logs through `tracing`.
#[derive(Debug)]
pub struct TracingProgress {
    max: AtomicUsize,
    position: AtomicUsize,
    cancelled: AtomicBool,
    interval: Duration,
    last_logged: Mutex<Option<Instant>>,
}

impl TracingProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            max: AtomicUsize::new(0),
            position: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            interval,
            last_logged: Mutex::new(None),
        }
    }

    /// Request cancellation; the running operation stops at the next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl ProgressListener for TracingProgress {
    fn set_max_steps(&self, steps: usize) {
        self.max.store(steps, Ordering::SeqCst);
    }

    fn max_steps(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn advance(&self, delta: usize, message: Option<&str>) {
        let position = self.position.fetch_add(delta, Ordering::SeqCst) + delta;
        let Some(message) = message else { return };
        let mut last = self.last_logged.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if last.is_none_or(|at| at.elapsed() >= self.interval) {
            info!(position, max = self.max_steps(), "{message}");
            *last = Some(Instant::now());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_indeterminate(&self, indeterminate: Option<bool>) {
        debug!(?indeterminate, "progress mode changed");
    }

    fn min_update_interval(&self) -> Duration {
        self.interval
    }
}

/// Batches per-item progress so a listener is updated at most once per
/// [`min_update_interval`](ProgressListener::min_update_interval).
#[derive(Debug, Default)]
pub(crate) struct Throttle {
    last: Option<Instant>,
    delta: usize,
}

impl Throttle {
    /// Count one item, publishing the accumulated steps if enough time passed.
    pub(crate) fn tick(&mut self, progress: &dyn ProgressListener, message: impl FnOnce() -> String) {
        self.delta += 1;
        let interval = progress.min_update_interval();
        if self.last.is_none_or(|at| at.elapsed() >= interval) {
            progress.advance(self.delta, Some(&message()));
            self.last = Some(Instant::now());
            self.delta = 0;
        }
    }

    /// Publish whatever the last interval still holds.
    pub(crate) fn finish(self, progress: &dyn ProgressListener, message: impl FnOnce() -> String) {
        if self.delta > 0 {
            progress.advance(self.delta, Some(&message()));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_progress() {
        let progress = TracingProgress::new(Duration::ZERO);
        progress.set_max_steps(10);
        progress.advance(3, Some("books"));
        progress.advance(2, None);
        assert_eq!(progress.position(), 5);
        assert_eq!(progress.max_steps(), 10);
        assert!(!progress.is_cancelled());
        progress.cancel();
        assert!(progress.is_cancelled());
    }

    #[test]
    fn test_throttle_batches_steps() {
        let progress = TracingProgress::new(Duration::from_secs(3600));
        let mut throttle = Throttle::default();
        for _ in 0..5 {
            throttle.tick(&progress, || "books".to_string());
        }
        // Only the first tick is published within the interval.
        assert_eq!(progress.position(), 1);
        throttle.finish(&progress, || "books".to_string());
        assert_eq!(progress.position(), 5);
    }

    #[test]
    fn test_finish_without_pending_steps() {
        let progress = TracingProgress::new(Duration::ZERO);
        let mut throttle = Throttle::default();
        throttle.tick(&progress, || "books".to_string());
        throttle.finish(&progress, || unreachable!("nothing left to publish"));
        assert_eq!(progress.position(), 1);
    }
}
