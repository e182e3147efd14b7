//! Courier integration test support
//!
//! Provides an in-process HTTP server and helpers shared by the integration
//! tests under `tests/`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// In-process HTTP server with download, upload and failure endpoints
pub mod server;

/// Test data, context construction and event collection helpers
pub mod test_utils;

pub use server::{served_data, ReceivedPart, ServerLog, TestServer};
pub use test_utils::*;
