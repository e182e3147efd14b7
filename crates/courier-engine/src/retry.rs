//! Retry policies deciding whether a finished task is resubmitted

use crate::task::TaskDescriptor;
use courier_types::{Error, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Decides whether a finished task goes back into the queue
pub trait RetryPolicy: Send + Sync {
    /// `error` is `None` when the task body succeeded
    fn should_retry(&self, task: &TaskDescriptor, error: Option<&Error>) -> bool;
}

/// Never resubmit
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn should_retry(&self, _task: &TaskDescriptor, _error: Option<&Error>) -> bool {
        false
    }
}

/// Resubmit tasks whose error is retryable, up to a bound per task id
#[derive(Debug, Default)]
pub struct RetryOnError {
    max_resubmissions: u32,
    resubmissions: Mutex<HashMap<TaskId, u32>>,
}

impl RetryOnError {
    /// Allow at most `max_resubmissions` resubmissions per task
    pub fn new(max_resubmissions: u32) -> Self {
        Self {
            max_resubmissions,
            resubmissions: Mutex::new(HashMap::new()),
        }
    }
}

impl RetryPolicy for RetryOnError {
    fn should_retry(&self, task: &TaskDescriptor, error: Option<&Error>) -> bool {
        let mut resubmissions = self.resubmissions.lock();
        let retryable = !task.is_cancelled() && error.is_some_and(Error::should_retry);
        let used = resubmissions.get(&task.id()).copied().unwrap_or(0);

        if retryable && used < self.max_resubmissions {
            resubmissions.insert(task.id(), used + 1);
            true
        } else {
            resubmissions.remove(&task.id());
            false
        }
    }
}

/// Retry policy backed by a closure
pub struct FnRetryPolicy<F>(F);

/// Wrap a closure as a [`RetryPolicy`]
pub fn retry_fn<F>(f: F) -> FnRetryPolicy<F>
where
    F: Fn(&TaskDescriptor, Option<&Error>) -> bool + Send + Sync,
{
    FnRetryPolicy(f)
}

impl<F> RetryPolicy for FnRetryPolicy<F>
where
    F: Fn(&TaskDescriptor, Option<&Error>) -> bool + Send + Sync,
{
    fn should_retry(&self, task: &TaskDescriptor, error: Option<&Error>) -> bool {
        (self.0)(task, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_on_error_is_bounded_per_task() {
        let policy = RetryOnError::new(2);
        let task = TaskDescriptor::new(TaskId::new(1), "flaky");
        let error = Error::transfer("connection reset");

        assert!(policy.should_retry(&task, Some(&error)));
        assert!(policy.should_retry(&task, Some(&error)));
        assert!(!policy.should_retry(&task, Some(&error)));
        // Counter resets once the task is given up on
        assert!(policy.should_retry(&task, Some(&error)));
    }

    #[test]
    fn test_retry_on_error_skips_success_and_fatal_errors() {
        let policy = RetryOnError::new(5);
        let task = TaskDescriptor::new(TaskId::new(2), "task");

        assert!(!policy.should_retry(&task, None));
        assert!(!policy.should_retry(&task, Some(&Error::argument("bad url"))));

        task.cancel();
        assert!(!policy.should_retry(&task, Some(&Error::transfer("reset"))));
    }

    #[test]
    fn test_closure_policy() {
        let policy = retry_fn(|task: &TaskDescriptor, error: Option<&Error>| {
            task.id().get() % 2 == 0 && error.is_some()
        });
        let even = TaskDescriptor::new(TaskId::new(4), "even");
        let odd = TaskDescriptor::new(TaskId::new(5), "odd");

        assert!(policy.should_retry(&even, Some(&Error::Cancelled)));
        assert!(!policy.should_retry(&odd, Some(&Error::Cancelled)));
        assert!(!NeverRetry.should_retry(&even, Some(&Error::Cancelled)));
    }
}
