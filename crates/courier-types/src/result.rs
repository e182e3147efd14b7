//! Result type alias for Courier operations

use crate::Error;

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, Error>;
