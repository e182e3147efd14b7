//! Execution traces: queue and run timing for tracked tasks

use courier_types::{Error, TaskId};
use std::time::{Duration, Instant};

/// Timing and failure record for one tracked task
///
/// A trace is created on first submission, refreshed when the task is
/// resubmitted, and dropped once the task finishes for good.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    id: TaskId,
    enqueued_at: Instant,
    started_at: Option<Instant>,
    time_waiting_in_queue: Duration,
    time_executing: Duration,
    last_error: Option<Error>,
    executions: u32,
}

impl ExecutionTrace {
    /// Create a trace for a task entering the queue at `now`
    pub fn new(id: TaskId, now: Instant) -> Self {
        Self {
            id,
            enqueued_at: now,
            started_at: None,
            time_waiting_in_queue: Duration::ZERO,
            time_executing: Duration::ZERO,
            last_error: None,
            executions: 0,
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// When the task most recently entered the queue
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Time the most recent execution spent waiting in the queue
    pub fn time_waiting_in_queue(&self) -> Duration {
        self.time_waiting_in_queue
    }

    /// Duration of the most recent execution
    pub fn time_executing(&self) -> Duration {
        self.time_executing
    }

    /// Error of the most recent execution, if any
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Number of times the task body has started
    pub fn executions(&self) -> u32 {
        self.executions
    }

    pub(crate) fn requeue(&mut self, now: Instant) {
        self.enqueued_at = now;
        self.started_at = None;
    }

    pub(crate) fn mark_started(&mut self, now: Instant) {
        self.time_waiting_in_queue = now.saturating_duration_since(self.enqueued_at);
        self.time_executing = Duration::ZERO;
        self.started_at = Some(now);
        self.executions += 1;
    }

    pub(crate) fn mark_finished(&mut self, now: Instant, error: Option<Error>) {
        if let Some(started_at) = self.started_at.take() {
            self.time_executing = now.saturating_duration_since(started_at);
        } else {
            self.time_waiting_in_queue = now.saturating_duration_since(self.enqueued_at);
        }
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_timings() {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(TaskId::new(1), start);

        trace.mark_started(start + Duration::from_millis(40));
        trace.mark_finished(start + Duration::from_millis(100), None);

        assert_eq!(trace.time_waiting_in_queue(), Duration::from_millis(40));
        assert_eq!(trace.time_executing(), Duration::from_millis(60));
        assert_eq!(trace.executions(), 1);
        assert!(trace.last_error().is_none());
    }

    #[test]
    fn test_finished_without_start_counts_as_waiting() {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(TaskId::new(2), start);

        trace.mark_finished(start + Duration::from_millis(25), Some(Error::Cancelled));

        assert_eq!(trace.time_waiting_in_queue(), Duration::from_millis(25));
        assert_eq!(trace.time_executing(), Duration::ZERO);
        assert_eq!(trace.last_error(), Some(&Error::Cancelled));
        assert_eq!(trace.executions(), 0);
    }

    #[test]
    fn test_requeue_resets_wait_origin() {
        let start = Instant::now();
        let mut trace = ExecutionTrace::new(TaskId::new(3), start);
        trace.mark_started(start + Duration::from_millis(10));
        trace.mark_finished(start + Duration::from_millis(20), Some(Error::transfer("reset")));

        trace.requeue(start + Duration::from_millis(50));
        trace.mark_started(start + Duration::from_millis(55));

        assert_eq!(trace.time_waiting_in_queue(), Duration::from_millis(5));
        assert_eq!(trace.executions(), 2);
    }
}
