//! Core type system and error handling for Courier
//!
//! This crate provides the foundational types shared by the task engine and the
//! transfer manager:
//!
//! - **Error handling**: One error taxonomy with kinds, severity levels and retry hints
//! - **Identity**: Task identifiers, id allocation and the durable task record
//! - **Configuration values**: Validated worker counts, chunk sizes, retry limits and timeouts
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use courier_types::{Error, Result, RetryLimit, TaskId};
//!
//! fn admit(id: TaskId, limit: RetryLimit) -> Result<u32> {
//!     limit
//!         .max_attempts()
//!         .ok_or_else(|| Error::argument(format!("task {} has no attempt bound", id)))
//! }
//!
//! assert_eq!(admit(TaskId::new(7), RetryLimit::limited(2)).unwrap(), 3);
//! assert!(admit(TaskId::new(8), RetryLimit::Unlimited).is_err());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use config::{ChunkSize, RetryLimit, TimeoutConfig, WorkerCount};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use types::{TaskId, TaskIdGenerator, TaskRecord};
