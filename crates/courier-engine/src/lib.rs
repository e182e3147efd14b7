//! Task execution engine for Courier
//!
//! A fixed pool of tokio workers pulls tasks from one FIFO admission queue.
//! Admission never blocks the caller: a stopped engine, a full queue, or a
//! duplicate id are reported as errors. Every admitted task is written to a
//! durable queue first so that work not yet finished can be replayed after a
//! restart.
//!
//! # Features
//!
//! - **Identity**: at most one queued or running task per [`TaskId`](courier_types::TaskId)
//! - **Cooperative cancellation**: monotonic cancel flags polled by task bodies
//! - **Execution traces**: time spent waiting and running, plus the last error
//! - **Retry policies**: pluggable predicate deciding whether a finished task is resubmitted
//! - **Recovery**: replay of durable records once the queue has been restored
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use courier_engine::{Runnable, TaskDescriptor, TaskEngine};
//! use courier_types::{Result, TaskId, TaskRecord};
//! use std::sync::Arc;
//!
//! struct Hello(TaskDescriptor);
//!
//! #[async_trait]
//! impl Runnable for Hello {
//!     fn descriptor(&self) -> &TaskDescriptor {
//!         &self.0
//!     }
//!
//!     fn record(&self) -> Result<TaskRecord> {
//!         Ok(TaskRecord::new(self.0.id(), self.0.name(), "hello", ""))
//!     }
//!
//!     async fn run(&self) -> Result<()> {
//!         println!("hello from {}", self.0.name());
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let engine = TaskEngine::builder().start()?;
//! engine.execute(Arc::new(Hello(TaskDescriptor::new(TaskId::new(1), "greeter"))))?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod listener;
pub mod queue;
pub mod retry;
pub mod task;
pub mod trace;

pub use engine::{EngineBuilder, EngineStats, TaskEngine, TaskFactory};
pub use listener::EngineListener;
pub use queue::{DurableQueue, MemoryQueue, RestoreCallback};
pub use retry::{retry_fn, FnRetryPolicy, NeverRetry, RetryOnError, RetryPolicy};
pub use task::{Runnable, TaskDescriptor};
pub use trace::ExecutionTrace;
