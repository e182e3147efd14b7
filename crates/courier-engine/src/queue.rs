//! Durable queue contract and an in-memory implementation

use courier_types::{Result, TaskId, TaskRecord};
use parking_lot::Mutex;

/// Callback invoked once a durable queue finishes restoring its contents
pub type RestoreCallback = Box<dyn FnOnce() + Send + 'static>;

/// Append/remove log that survives process restarts
///
/// Implementations are internally synchronized. The engine never calls them
/// while holding its own lock.
pub trait DurableQueue: Send + Sync {
    /// Store a record, replacing any record with the same id
    fn append(&self, record: TaskRecord) -> Result<()>;

    /// Remove the record with the given id; missing ids are not an error
    fn remove_by_id(&self, id: TaskId) -> Result<()>;

    /// All stored records in append order
    fn list_all(&self) -> Result<Vec<TaskRecord>>;

    /// Whether restoring from storage has already completed
    fn is_restored(&self) -> bool;

    /// Register a one-shot callback fired when restoring completes
    ///
    /// If restoring has already completed the callback may run immediately.
    fn on_restore_complete(&self, callback: RestoreCallback);
}

#[derive(Default)]
struct MemoryQueueState {
    records: Vec<TaskRecord>,
    restored: bool,
    callbacks: Vec<RestoreCallback>,
}

/// In-memory durable queue
///
/// Useful as the default collaborator and in tests. [`MemoryQueue::restoring`]
/// creates a queue that reports restore completion only once
/// [`MemoryQueue::complete_restore`] is called.
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    /// Create an empty, already restored queue
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Create an already restored queue holding `records`
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryQueueState {
                records,
                restored: true,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Create a queue still restoring `records`
    pub fn restoring(records: Vec<TaskRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryQueueState {
                records,
                restored: false,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Mark restoring as complete and fire pending callbacks
    pub fn complete_restore(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            state.restored = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether the queue holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableQueue for MemoryQueue {
    fn append(&self, record: TaskRecord) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state.records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            state.records.push(record);
        }
        Ok(())
    }

    fn remove_by_id(&self, id: TaskId) -> Result<()> {
        self.state.lock().records.retain(|r| r.id != id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.state.lock().records.clone())
    }

    fn is_restored(&self) -> bool {
        self.state.lock().restored
    }

    fn on_restore_complete(&self, callback: RestoreCallback) {
        let mut state = self.state.lock();
        if state.restored {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
    }
}
