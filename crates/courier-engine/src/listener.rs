//! Engine lifecycle listeners

use crate::task::TaskDescriptor;
use crate::trace::ExecutionTrace;
use courier_types::Error;
use std::sync::Arc;

/// Observer of task admission and execution
///
/// Callbacks run on the submitting thread or a worker, never while the engine
/// lock is held. All methods default to no-ops.
pub trait EngineListener: Send + Sync {
    /// A task was admitted; counts are taken right after admission
    fn on_added_to_queue(&self, _task: &TaskDescriptor, _waiting: usize, _active: usize) {}

    /// A worker is about to run the task body
    fn on_before_execute(&self, _task: &TaskDescriptor, _trace: &ExecutionTrace) {}

    /// The task finished, failed, or was cancelled before starting
    fn on_after_execute(
        &self,
        _task: &TaskDescriptor,
        _error: Option<&Error>,
        _trace: &ExecutionTrace,
    ) {
    }
}

pub(crate) fn same_listener(a: &Arc<dyn EngineListener>, b: &Arc<dyn EngineListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
