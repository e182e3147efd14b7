//! Task descriptors and the runnable contract

use async_trait::async_trait;
use courier_types::{Result, TaskId, TaskRecord};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Identity plus running and cancel flags of one schedulable unit
///
/// Clones share their flags, so a descriptor handed to a caller observes the
/// same state as the one held by the engine. Cancellation is monotonic: once
/// [`TaskDescriptor::cancel`] has been called, [`TaskDescriptor::is_cancelled`]
/// stays `true` for the lifetime of every clone.
#[derive(Clone)]
pub struct TaskDescriptor {
    id: TaskId,
    name: Arc<str>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TaskDescriptor {
    /// Create a new descriptor
    pub fn new<S: AsRef<str>>(id: TaskId, name: S) -> Self {
        Self {
            id,
            name: Arc::from(name.as_ref()),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Human readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a worker is currently executing the task body
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Future resolving once cancellation is requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Token backing the cancel flag, for use in `select!` arms
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Unit of work scheduled by the [`TaskEngine`](crate::TaskEngine)
///
/// The body must poll its descriptor's cancel flag at safe points; the engine
/// never aborts a running body.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Shared identity and flags
    fn descriptor(&self) -> &TaskDescriptor;

    /// Durable form written to the durable queue before admission
    fn record(&self) -> Result<TaskRecord>;

    /// Execute the task body
    async fn run(&self) -> Result<()>;

    /// Called instead of [`Runnable::run`] when the task was cancelled while queued
    fn on_cancelled_before_start(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flags() {
        let descriptor = TaskDescriptor::new(TaskId::new(1), "download");
        let clone = descriptor.clone();

        clone.set_running(true);
        assert!(descriptor.is_running());

        descriptor.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancellation_is_monotonic() {
        let descriptor = TaskDescriptor::new(TaskId::new(2), "upload");
        descriptor.cancel();
        descriptor.set_running(false);
        descriptor.cancel();
        assert!(descriptor.is_cancelled());
    }

    #[test]
    fn test_cancelled_future_wakes_on_cancel() {
        let descriptor = TaskDescriptor::new(TaskId::new(3), "wait");
        let waiter = descriptor.clone();
        let mut cancelled = tokio_test::task::spawn(waiter.cancelled());

        tokio_test::assert_pending!(cancelled.poll());
        descriptor.cancel();
        assert!(cancelled.is_woken());
        tokio_test::assert_ready!(cancelled.poll());
    }
}
