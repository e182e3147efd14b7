//! HTTP transfer manager for Courier
//!
//! Uploads and downloads run as tasks on the [`courier_engine`] task engine,
//! driven by one attempt loop:
//!
//! `Starting → Connecting → Uploading* → Downloading* → outcome`
//!
//! Each submission reports a monotonic sequence of [`TransferState`]s to the
//! registered [`TransferListener`]s and ends in exactly one final state.
//! Progress states are throttled per listener; the completing notification is
//! always delivered.
//!
//! # Examples
//!
//! ```rust,no_run
//! use courier_config::Config;
//! use courier_engine::MemoryQueue;
//! use courier_transfer::{ChannelListener, DownloadTarget, TransferContext, TransferRequest};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> courier_types::Result<()> {
//! let context = TransferContext::start(&Config::default(), Arc::new(MemoryQueue::new()))?;
//! let (listener, mut events) = ChannelListener::new();
//! context.add_listener(Arc::new(listener));
//!
//! let request = TransferRequest::download(
//!     context.next_id(),
//!     "https://example.com/archive.tar.gz",
//!     DownloadTarget::Directory("downloads".into()),
//! );
//! context.submit(request)?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod body;
pub mod context;
pub mod files;
pub mod listener;
pub mod manager;
pub mod progress;
mod reporter;
pub mod request;
pub mod response;
pub mod settings;
pub mod state;

pub use body::UploadBody;
pub use context::TransferContext;
pub use files::{Destination, FileLocks};
pub use listener::{
    ChannelListener, ListenerFilter, ListenerRegistry, TransferEvent, TransferListener,
    DEFAULT_NOTIFY_INTERVAL,
};
pub use manager::{TransferTask, TRANSFER_TASK_KIND};
pub use progress::{PhaseProgress, TransferProcessInfo};
pub use request::{DownloadTarget, FormField, Method, MultipartFile, RequestBody, TransferRequest};
pub use response::{Response, ResponseBody, ResponseStatus};
pub use settings::{DeclinedPolicy, DownloadWriteMode, ReadBodyMode, TransferSettings};
pub use state::TransferState;
