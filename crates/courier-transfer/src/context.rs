//! Explicitly constructed transfer context owning the engine and listeners

use crate::files::FileLocks;
use crate::listener::{ListenerRegistry, TransferListener};
use crate::manager::{TransferShared, TransferTask};
use crate::request::TransferRequest;
use crate::settings::TransferSettings;
use courier_config::{Config, TransferDefaults};
use courier_engine::{DurableQueue, Runnable, TaskDescriptor, TaskEngine};
use courier_types::{Result, TaskId, TaskIdGenerator};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns a task engine running transfer tasks plus the shared listener set
///
/// Create one with [`TransferContext::start`] inside a tokio runtime and end
/// it with [`TransferContext::shutdown`]. Clones share the same engine.
#[derive(Clone)]
pub struct TransferContext {
    engine: TaskEngine,
    shared: Arc<TransferShared>,
    ids: Arc<TaskIdGenerator>,
    defaults: TransferDefaults,
}

impl TransferContext {
    /// Start the engine and replay transfers left in `queue`
    pub fn start(config: &Config, queue: Arc<dyn DurableQueue>) -> Result<Self> {
        let shared = Arc::new(TransferShared {
            listeners: Arc::new(ListenerRegistry::new(config.transfer.notify_interval)),
            locks: Arc::new(FileLocks::new()),
        });
        let ids = Arc::new(TaskIdGenerator::new());

        let factory_shared = Arc::clone(&shared);
        let factory_ids = Arc::clone(&ids);
        let engine = TaskEngine::builder()
            .config(config.engine.clone())
            .durable_queue(queue)
            .task_factory(move |record| {
                factory_ids.observe(record.id);
                let task = TransferTask::from_record(record, Arc::clone(&factory_shared))?;
                Ok(Arc::new(task) as Arc<dyn Runnable>)
            })
            .start()?;

        info!("Transfer context started");
        Ok(Self {
            engine,
            shared,
            ids,
            defaults: config.transfer.clone(),
        })
    }

    /// Settings seeded from the configured transfer defaults
    pub fn default_settings(&self) -> TransferSettings {
        TransferSettings::from_defaults(&self.defaults)
    }

    /// Allocate an id not used by any submission of this context
    pub fn next_id(&self) -> TaskId {
        self.ids.next_id()
    }

    /// Validate and admit a transfer
    ///
    /// The returned descriptor keeps reporting the cancel flag after the
    /// transfer has finished.
    pub fn submit(&self, request: TransferRequest) -> Result<TaskDescriptor> {
        request.validate()?;
        self.ids.observe(request.id);
        let task = Arc::new(TransferTask::new(request, Arc::clone(&self.shared)));
        let descriptor = task.descriptor().clone();
        self.engine.execute(task)?;
        debug!("Submitted transfer {}", descriptor.name());
        Ok(descriptor)
    }

    /// Submit several transfers, reporting each outcome in order
    pub fn submit_all<I>(&self, requests: I) -> Vec<Result<TaskDescriptor>>
    where
        I: IntoIterator<Item = TransferRequest>,
    {
        requests.into_iter().map(|r| self.submit(r)).collect()
    }

    /// Cancel a queued or running transfer; returns whether it was tracked
    pub fn cancel(&self, id: TaskId) -> bool {
        self.engine.cancel_task(id)
    }

    /// Cancel every tracked transfer
    pub fn cancel_all(&self) {
        self.engine.cancel_all_tasks();
    }

    /// Whether a transfer with this id is queued or running
    pub fn contains(&self, id: TaskId) -> bool {
        self.engine.contains_task(id)
    }

    /// Register a transfer listener
    pub fn add_listener(&self, listener: Arc<dyn TransferListener>) {
        self.shared.listeners.add(listener);
    }

    /// Unregister a transfer listener
    pub fn remove_listener(&self, listener: &Arc<dyn TransferListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// The underlying task engine
    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    /// Stop the engine; queued transfers are reported cancelled and stay durable
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        info!("Transfer context stopped");
    }
}
