//! Task identity and the durable task record

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a schedulable unit
///
/// An id must be unique among the tasks currently queued or running in one
/// engine; it becomes reusable once the task has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TaskId(u64);

impl TaskId {
    /// Create a task id from a raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw id value
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// Monotonic allocator of task ids
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a generator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose first id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure ids handed out later are greater than `id`
    pub fn observe(&self, id: TaskId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }
}

/// Durable form of a task descriptor, as stored by a durable queue
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TaskRecord {
    /// Task identifier
    pub id: TaskId,
    /// Human readable task name
    pub name: String,
    /// Discriminator used by the replay factory
    pub kind: String,
    /// Serialized task payload
    pub payload: String,
}

impl TaskRecord {
    /// Create a new task record
    pub fn new<N, K, P>(id: TaskId, name: N, kind: K, payload: P) -> Self
    where
        N: Into<String>,
        K: Into<String>,
        P: Into<String>,
    {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            payload: payload.into(),
        }
    }
}
