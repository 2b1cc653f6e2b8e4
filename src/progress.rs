//! Progress-callback trait for client-side task polling.
//!
//! Inject an [`Arc<dyn PollProgressCallback>`] into
//! [`crate::poll::TaskPoller::with_callback`] to receive events while a task
//! is being polled.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal spinner, a log line or a UI
//! without the poller knowing how the host application communicates. The
//! trait is `Send + Sync` so one callback can be shared by several pollers.
//!
//! # Example
//!
//! ```rust
//! use docbeautify::{PollProgressCallback, TaskReport};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct CountingCallback {
//!     polls: AtomicU32,
//! }
//!
//! impl PollProgressCallback for CountingCallback {
//!     fn on_poll(&self, _attempt: u32, report: &TaskReport) {
//!         self.polls.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} at {}%", report.status, report.progress);
//!     }
//! }
//!
//! let cb: Arc<dyn PollProgressCallback> = Arc::new(CountingCallback { polls: AtomicU32::new(0) });
//! cb.on_submitted("6f1c");
//! ```

use crate::task::{TaskReport, TaskStatus};
use std::sync::Arc;

/// Called by [`crate::poll::TaskPoller`] as it polls a task.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PollProgressCallback: Send + Sync {
    /// Called once when a task id is known, before the first poll.
    fn on_submitted(&self, task_id: &str) {
        let _ = task_id;
    }

    /// Called after every successful poll.
    ///
    /// # Arguments
    /// * `attempt`: 1-indexed poll attempt
    /// * `report`: the task as returned by the server
    fn on_poll(&self, attempt: u32, report: &TaskReport) {
        let _ = (attempt, report);
    }

    /// Called when a poll request fails and will be retried.
    fn on_retry(&self, attempt: u32, error: &str) {
        let _ = (attempt, error);
    }

    /// Called once when polling stops on a terminal status.
    fn on_finished(&self, status: TaskStatus, attempts: u32) {
        let _ = (status, attempts);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PollProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback type.
pub type ProgressCallback = Arc<dyn PollProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        polls: AtomicU32,
        retries: AtomicU32,
        finished: Mutex<Option<(TaskStatus, u32)>>,
    }

    impl PollProgressCallback for TrackingCallback {
        fn on_poll(&self, _attempt: u32, _report: &TaskReport) {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry(&self, _attempt: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished(&self, status: TaskStatus, attempts: u32) {
            *self.finished.lock().unwrap() = Some((status, attempts));
        }
    }

    fn report(status: TaskStatus) -> TaskReport {
        let mut t = crate::task::TaskRecord::new_pending();
        t.status = status;
        TaskReport::from(t)
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_submitted("abc");
        cb.on_poll(1, &report(TaskStatus::Pending));
        cb.on_retry(2, "connection reset");
        cb.on_finished(TaskStatus::Completed, 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_poll(1, &report(TaskStatus::Pending));
        tracker.on_retry(2, "timeout");
        tracker.on_poll(3, &report(TaskStatus::Completed));
        tracker.on_finished(TaskStatus::Completed, 3);

        assert_eq!(tracker.polls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.finished.lock().unwrap(),
            Some((TaskStatus::Completed, 3))
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_submitted("abc");
    }
}
