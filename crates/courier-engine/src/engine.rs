//! The task execution engine: admission, worker pool and recovery

use crate::listener::{same_listener, EngineListener};
use crate::queue::{DurableQueue, MemoryQueue};
use crate::retry::{NeverRetry, RetryPolicy};
use crate::task::{Runnable, TaskDescriptor};
use crate::trace::ExecutionTrace;
use courier_config::EngineConfig;
use courier_types::{Error, Result, TaskId, TaskRecord, WorkerCount};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rebuilds a runnable task from its durable record during recovery
pub type TaskFactory = dyn Fn(&TaskRecord) -> Result<Arc<dyn Runnable>> + Send + Sync;

/// Waiting and active task counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Tasks admitted but not yet started
    pub waiting: usize,
    /// Tasks currently running
    pub active: usize,
}

#[derive(Default)]
struct EngineState {
    fifo: VecDeque<TaskId>,
    waiting: HashMap<TaskId, Arc<dyn Runnable>>,
    active: HashMap<TaskId, Arc<dyn Runnable>>,
    traces: HashMap<TaskId, ExecutionTrace>,
    stopped: bool,
}

impl EngineState {
    fn stats(&self) -> EngineStats {
        EngineStats {
            waiting: self.waiting.len(),
            active: self.active.len(),
        }
    }

    fn pop_next(&mut self) -> Option<Arc<dyn Runnable>> {
        while let Some(id) = self.fifo.pop_front() {
            if let Some(task) = self.waiting.get(&id) {
                return Some(Arc::clone(task));
            }
        }
        None
    }
}

struct EngineInner {
    worker_count: WorkerCount,
    queue_capacity: usize,
    state: Mutex<EngineState>,
    listeners: Mutex<Vec<Arc<dyn EngineListener>>>,
    queue: Arc<dyn DurableQueue>,
    retry_policy: Arc<dyn RetryPolicy>,
    notify: Notify,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded worker pool running [`Runnable`] tasks from one FIFO queue
///
/// Cloning yields another handle to the same engine. Workers keep the engine
/// alive until [`TaskEngine::shutdown`] is called.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

/// Builder for [`TaskEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    queue: Option<Arc<dyn DurableQueue>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    listeners: Vec<Arc<dyn EngineListener>>,
    factory: Option<Arc<TaskFactory>>,
}

impl EngineBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            queue: None,
            retry_policy: None,
            listeners: Vec::new(),
            factory: None,
        }
    }

    /// Use the given engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of workers
    pub fn worker_count(mut self, worker_count: WorkerCount) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    /// Set the waiting-queue capacity, 0 means unlimited
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Use a durable queue collaborator; defaults to [`MemoryQueue`]
    pub fn durable_queue(mut self, queue: Arc<dyn DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use a retry policy; defaults to [`NeverRetry`]
    pub fn retry_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// Register a listener before any task is admitted
    pub fn listener(mut self, listener: Arc<dyn EngineListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replay the durable queue through `factory` once the engine starts
    pub fn task_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TaskRecord) -> Result<Arc<dyn Runnable>> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Spawn the workers on the current tokio runtime
    pub fn start(self) -> Result<TaskEngine> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::other(format!("Task engine requires a tokio runtime: {}", e)))?;

        let queue: Arc<dyn DurableQueue> = match self.queue {
            Some(queue) => queue,
            None => Arc::new(MemoryQueue::new()),
        };
        let retry_policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(NeverRetry),
        };

        let inner = Arc::new(EngineInner {
            worker_count: self.config.worker_count,
            queue_capacity: self.config.queue_capacity,
            state: Mutex::new(EngineState::default()),
            listeners: Mutex::new(self.listeners),
            queue,
            retry_policy,
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let handles = (0..inner.worker_count.get())
            .map(|index| runtime.spawn(Arc::clone(&inner).worker_loop(index)))
            .collect();
        *inner.workers.lock() = handles;

        info!(
            "Task engine started with {} workers (queue capacity {})",
            inner.worker_count.get(),
            inner.queue_capacity
        );

        let engine = TaskEngine { inner };
        if let Some(factory) = self.factory {
            engine.recover_shared(factory);
        }
        Ok(engine)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskEngine {
    /// Create a builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Admit a task without blocking the caller
    ///
    /// Fails with [`Error::EngineStopped`] after shutdown, [`Error::QueueFull`]
    /// when the waiting queue is at capacity, and [`Error::DuplicateTask`] when
    /// a task with the same id is queued or running. The task's record is
    /// written to the durable queue before the task becomes visible to workers.
    pub fn execute(&self, task: Arc<dyn Runnable>) -> Result<()> {
        self.inner.execute(task)
    }

    /// Admit several tasks, returning one result per task in order
    pub fn execute_all<I>(&self, tasks: I) -> Vec<Result<()>>
    where
        I: IntoIterator<Item = Arc<dyn Runnable>>,
    {
        tasks.into_iter().map(|task| self.execute(task)).collect()
    }

    /// Request cancellation of a queued or running task
    ///
    /// Returns `false` when no task with this id is tracked.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let descriptor = {
            let state = self.inner.state.lock();
            state
                .waiting
                .get(&id)
                .or_else(|| state.active.get(&id))
                .map(|task| task.descriptor().clone())
        };

        match descriptor {
            Some(descriptor) => {
                debug!("Cancelling task {}", id);
                descriptor.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every tracked task
    pub fn cancel_all_tasks(&self) {
        for descriptor in self.get_all_tasks() {
            descriptor.cancel();
        }
    }

    /// Whether a task with this id is queued or running
    pub fn contains_task(&self, id: TaskId) -> bool {
        let state = self.inner.state.lock();
        state.waiting.contains_key(&id) || state.active.contains_key(&id)
    }

    /// Look up a queued or running task
    pub fn find_runnable_by_id(&self, id: TaskId) -> Option<Arc<dyn Runnable>> {
        let state = self.inner.state.lock();
        state
            .waiting
            .get(&id)
            .or_else(|| state.active.get(&id))
            .cloned()
    }

    /// Descriptors of queued tasks in queue order
    pub fn get_waiting_tasks(&self) -> Vec<TaskDescriptor> {
        let state = self.inner.state.lock();
        state
            .fifo
            .iter()
            .filter_map(|id| state.waiting.get(id))
            .map(|task| task.descriptor().clone())
            .collect()
    }

    /// Descriptors of running tasks
    pub fn get_active_tasks(&self) -> Vec<TaskDescriptor> {
        let state = self.inner.state.lock();
        state
            .active
            .values()
            .map(|task| task.descriptor().clone())
            .collect()
    }

    /// Descriptors of every tracked task, queued first
    pub fn get_all_tasks(&self) -> Vec<TaskDescriptor> {
        let mut tasks = self.get_waiting_tasks();
        tasks.extend(self.get_active_tasks());
        tasks
    }

    /// Snapshot of the trace of a tracked task
    pub fn trace(&self, id: TaskId) -> Option<ExecutionTrace> {
        self.inner.state.lock().traces.get(&id).cloned()
    }

    /// Current waiting and active counts
    pub fn stats(&self) -> EngineStats {
        self.inner.state.lock().stats()
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count.get()
    }

    /// Whether [`TaskEngine::shutdown`] has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Durable queue collaborator
    pub fn durable_queue(&self) -> &Arc<dyn DurableQueue> {
        &self.inner.queue
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn EngineListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Unregister a listener; returns whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn EngineListener>) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Resubmit every record of the durable queue once it has been restored
    ///
    /// Replays immediately when the queue reports that restoring is complete,
    /// otherwise registers a one-shot restore callback.
    pub fn recover<F>(&self, factory: F)
    where
        F: Fn(&TaskRecord) -> Result<Arc<dyn Runnable>> + Send + Sync + 'static,
    {
        self.recover_shared(Arc::new(factory));
    }

    fn recover_shared(&self, factory: Arc<TaskFactory>) {
        if self.inner.queue.is_restored() {
            self.replay(factory.as_ref());
        } else {
            debug!("Durable queue still restoring, deferring replay");
            let engine = self.clone();
            self.inner
                .queue
                .on_restore_complete(Box::new(move || {
                    engine.replay(factory.as_ref());
                }));
        }
    }

    /// Resubmit every durable record through `factory`, returning how many were admitted
    pub fn replay(&self, factory: &TaskFactory) -> usize {
        let records = match self.inner.queue.list_all() {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list durable queue for replay: {}", e);
                return 0;
            }
        };

        let mut admitted = 0;
        for record in records {
            let id = record.id;
            let result = factory(&record).and_then(|task| self.execute(task));
            match result {
                Ok(()) => admitted += 1,
                Err(Error::DuplicateTask { .. }) => debug!("Task {} already tracked", id),
                Err(e) => warn!("Failed to replay task {}: {}", id, e),
            }
        }

        info!("Replayed {} tasks from the durable queue", admitted);
        admitted
    }

    /// Stop admitting work, cancel every tracked task and join the workers
    ///
    /// Tasks still queued are reported as cancelled but keep their durable
    /// records, so they are replayed on the next start.
    pub async fn shutdown(&self) {
        let (drained, running) = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                (Vec::new(), Vec::new())
            } else {
                state.stopped = true;
                let ids: Vec<TaskId> = state.fifo.drain(..).collect();
                let mut drained = Vec::new();
                for id in ids {
                    if let Some(task) = state.waiting.remove(&id) {
                        let now = Instant::now();
                        let mut trace = state
                            .traces
                            .remove(&id)
                            .unwrap_or_else(|| ExecutionTrace::new(id, now));
                        trace.mark_finished(now, Some(Error::Cancelled));
                        drained.push((task, trace));
                    }
                }
                let running: Vec<TaskDescriptor> = state
                    .active
                    .values()
                    .map(|task| task.descriptor().clone())
                    .collect();
                (drained, running)
            }
        };

        info!(
            "Shutting down task engine ({} queued, {} running)",
            drained.len(),
            running.len()
        );

        for descriptor in &running {
            descriptor.cancel();
        }

        for (task, trace) in drained {
            let descriptor = task.descriptor();
            descriptor.cancel();
            task.on_cancelled_before_start();
            self.inner.for_each_listener(|listener| {
                listener.on_after_execute(descriptor, Some(&Error::Cancelled), &trace);
            });
        }

        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();

        let handles = std::mem::take(&mut *self.inner.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker terminated abnormally: {}", e);
            }
        }
        info!("Task engine stopped");
    }
}

impl EngineInner {
    fn listeners_snapshot(&self) -> Vec<Arc<dyn EngineListener>> {
        self.listeners.lock().clone()
    }

    fn for_each_listener<F: Fn(&dyn EngineListener)>(&self, f: F) {
        for listener in self.listeners_snapshot() {
            f(listener.as_ref());
        }
    }

    fn execute(&self, task: Arc<dyn Runnable>) -> Result<()> {
        let id = task.descriptor().id();
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(Error::EngineStopped);
            }
            if self.queue_capacity > 0 && state.waiting.len() >= self.queue_capacity {
                return Err(Error::QueueFull {
                    capacity: self.queue_capacity,
                });
            }
            if state.waiting.contains_key(&id) || state.active.contains_key(&id) {
                return Err(Error::DuplicateTask { id });
            }
            state.waiting.insert(id, Arc::clone(&task));
        }

        if let Err(e) = task.record().and_then(|record| self.queue.append(record)) {
            self.state.lock().waiting.remove(&id);
            warn!("Failed to persist task {}: {}", id, e);
            return Err(e);
        }

        let stats = {
            let mut state = self.state.lock();
            if state.stopped {
                state.waiting.remove(&id);
                return Err(Error::EngineStopped);
            }
            if !state.waiting.contains_key(&id) {
                return Err(Error::EngineStopped);
            }
            let now = Instant::now();
            state.fifo.push_back(id);
            state
                .traces
                .entry(id)
                .and_modify(|trace| trace.requeue(now))
                .or_insert_with(|| ExecutionTrace::new(id, now));
            state.stats()
        };

        self.notify.notify_one();
        debug!(
            "Task {} queued ({} waiting, {} active)",
            id, stats.waiting, stats.active
        );

        let descriptor = task.descriptor();
        self.for_each_listener(|listener| {
            listener.on_added_to_queue(descriptor, stats.waiting, stats.active);
        });
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, index: usize) {
        debug!("Worker {} started", index);
        loop {
            let task = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                task = self.next_task() => task,
            };
            self.dispatch(task).await;
        }
        debug!("Worker {} stopped", index);
    }

    async fn next_task(&self) -> Arc<dyn Runnable> {
        loop {
            let next = self.state.lock().pop_next();
            if let Some(task) = next {
                return task;
            }
            self.notify.notified().await;
        }
    }

    async fn dispatch(&self, task: Arc<dyn Runnable>) {
        let descriptor = task.descriptor().clone();
        let id = descriptor.id();

        if descriptor.is_cancelled() {
            self.skip_cancelled(&task);
            return;
        }

        let trace = {
            let mut state = self.state.lock();
            state.waiting.remove(&id);
            state.active.insert(id, Arc::clone(&task));
            descriptor.set_running(true);
            let trace = state
                .traces
                .entry(id)
                .or_insert_with(|| ExecutionTrace::new(id, Instant::now()));
            trace.mark_started(Instant::now());
            trace.clone()
        };

        debug!(
            "Running task {} after {:?} in queue",
            id,
            trace.time_waiting_in_queue()
        );
        self.for_each_listener(|listener| listener.on_before_execute(&descriptor, &trace));

        let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(Error::other(format!(
                "Task {} panicked: {}",
                id,
                panic_message(panic.as_ref())
            ))),
        };

        self.finish(&task, error);
    }

    fn skip_cancelled(&self, task: &Arc<dyn Runnable>) {
        let descriptor = task.descriptor();
        let id = descriptor.id();
        let trace = {
            let mut state = self.state.lock();
            state.waiting.remove(&id);
            let now = Instant::now();
            let mut trace = state
                .traces
                .remove(&id)
                .unwrap_or_else(|| ExecutionTrace::new(id, now));
            trace.mark_finished(now, Some(Error::Cancelled));
            trace
        };

        debug!("Task {} cancelled before start", id);
        task.on_cancelled_before_start();
        if let Err(e) = self.queue.remove_by_id(id) {
            warn!("Failed to remove task {} from durable queue: {}", id, e);
        }

        self.for_each_listener(|listener| {
            listener.on_after_execute(descriptor, Some(&Error::Cancelled), &trace);
        });
    }

    fn finish(&self, task: &Arc<dyn Runnable>, error: Option<Error>) {
        let descriptor = task.descriptor();
        let id = descriptor.id();
        descriptor.set_running(false);

        if let Err(e) = self.queue.remove_by_id(id) {
            warn!("Failed to remove task {} from durable queue: {}", id, e);
        }

        let trace = {
            let mut state = self.state.lock();
            state.active.remove(&id);
            let trace = state
                .traces
                .entry(id)
                .or_insert_with(|| ExecutionTrace::new(id, Instant::now()));
            trace.mark_finished(Instant::now(), error.clone());
            trace.clone()
        };

        match &error {
            Some(e) => debug!("Task {} failed after {:?}: {}", id, trace.time_executing(), e),
            None => debug!("Task {} finished in {:?}", id, trace.time_executing()),
        }

        let resubmitted = self.retry_policy.should_retry(descriptor, error.as_ref())
            && match self.execute(Arc::clone(task)) {
                Ok(()) => {
                    debug!("Task {} resubmitted by retry policy", id);
                    true
                }
                Err(e) => {
                    warn!("Failed to resubmit task {}: {}", id, e);
                    false
                }
            };

        if !resubmitted {
            self.state.lock().traces.remove(&id);
        }

        self.for_each_listener(|listener| {
            listener.on_after_execute(descriptor, error.as_ref(), &trace);
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
