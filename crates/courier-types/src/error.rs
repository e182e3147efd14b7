//! Error types and handling for Courier
//!
//! Every failure that crosses a crate boundary is expressed as one [`Error`]. The
//! variants follow the transfer taxonomy: argument errors are rejected at
//! submission, file errors end an attempt without touching the network retry
//! budget, transport errors and declined responses are retried per policy, and
//! cancellation is never retried.

use crate::TaskId;
use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - operation should be retried
    Medium,
    /// High severity - operation should be aborted
    High,
    /// Critical severity - entire process should be terminated
    Critical,
}

/// Main error type for Courier operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Malformed descriptor or settings, rejected at submission
    #[error("Invalid argument: {message}")]
    Argument {
        /// Description of the invalid argument
        message: String,
    },

    /// A local file could not be created, opened or locked
    #[error("File error for '{path}': {message}")]
    FileReason {
        /// Path of the offending file
        path: PathBuf,
        /// Error message describing the file issue
        message: String,
    },

    /// Connection or I/O failure during a transfer attempt
    #[error("Transfer error: {message}")]
    Transfer {
        /// Error message describing the transport issue
        message: String,
    },

    /// The server answered with a status outside the accepted set
    #[error("Response declined with status {code}: {message}")]
    Declined {
        /// HTTP status code
        code: u16,
        /// Reason phrase or body excerpt
        message: String,
    },

    /// Every allowed attempt failed
    #[error("Retries exceeded after {attempts} attempts")]
    RetriesExceeded {
        /// Number of attempts made
        attempts: u32,
    },

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// The engine no longer accepts work
    #[error("Task engine is stopped")]
    EngineStopped,

    /// The admission queue is at capacity
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// A task with the same id is already queued or running
    #[error("Task {id} is already queued or running")]
    DuplicateTask {
        /// Identifier of the rejected task
        id: TaskId,
    },

    /// The durable queue collaborator failed
    #[error("Durable queue error: {message}")]
    Persistence {
        /// Error message from the durable queue
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {millis} ms")]
    Timeout {
        /// Elapsed milliseconds before giving up
        millis: u64,
    },

    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Argument validation errors
    Argument,
    /// Local file errors
    File,
    /// Network and transport errors
    Transfer,
    /// Declined responses
    Declined,
    /// Retry budget exhausted
    RetriesExceeded,
    /// Cancellation
    Cancelled,
    /// Admission errors raised by the engine
    Admission,
    /// Durable queue errors
    Persistence,
    /// Timeout
    Timeout,
    /// I/O related errors
    Io,
    /// Configuration errors
    Config,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::FileReason { .. } => ErrorKind::File,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Declined { .. } => ErrorKind::Declined,
            Self::RetriesExceeded { .. } => ErrorKind::RetriesExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::EngineStopped | Self::QueueFull { .. } | Self::DuplicateTask { .. } => {
                ErrorKind::Admission
            }
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } => ErrorKind::Config,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Argument { .. } | Self::Config { .. } => ErrorSeverity::High,
            Self::FileReason { .. } => ErrorSeverity::High,
            Self::Transfer { .. } | Self::Declined { .. } => ErrorSeverity::Medium,
            Self::RetriesExceeded { .. } => ErrorSeverity::High,
            Self::Cancelled => ErrorSeverity::Low,
            Self::EngineStopped => ErrorSeverity::High,
            Self::QueueFull { .. } => ErrorSeverity::Medium,
            Self::DuplicateTask { .. } => ErrorSeverity::Low,
            Self::Persistence { .. } => ErrorSeverity::Medium,
            Self::Timeout { .. } | Self::Io { .. } => ErrorSeverity::Medium,
            Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transfer { .. }
            | Self::Declined { .. }
            | Self::Timeout { .. }
            | Self::Io { .. }
            | Self::QueueFull { .. }
            | Self::Persistence { .. }
            | Self::Other { .. } => true,
            Self::Argument { .. }
            | Self::FileReason { .. }
            | Self::RetriesExceeded { .. }
            | Self::Cancelled
            | Self::EngineStopped
            | Self::DuplicateTask { .. }
            | Self::Config { .. } => false,
        }
    }

    /// Check if this error should trigger a retry
    pub fn should_retry(&self) -> bool {
        self.is_recoverable() && self.severity() <= ErrorSeverity::Medium
    }

    /// Check if this error represents a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Create a new argument error
    pub fn argument<S: Into<String>>(message: S) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    /// Create a new file error
    pub fn file_reason<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::FileReason {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new transfer error
    pub fn transfer<S: Into<String>>(message: S) -> Self {
        Self::Transfer {
            message: message.into(),
        }
    }

    /// Create a new declined-response error
    pub fn declined<S: Into<String>>(code: u16, message: S) -> Self {
        Self::Declined {
            code,
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    proptest! {
        #[test]
        fn test_retry_hint_requires_recoverable(message in ".*", code in 100u16..600u16) {
            let errors = vec![
                Error::argument(message.clone()),
                Error::transfer(message.clone()),
                Error::declined(code, message.clone()),
                Error::persistence(message.clone()),
                Error::config(message.clone()),
                Error::other(message.clone()),
                Error::Io { message: message.clone() },
            ];

            for error in errors {
                if error.should_retry() {
                    prop_assert!(error.is_recoverable());
                    prop_assert!(error.severity() <= ErrorSeverity::Medium);
                }
            }
        }

        #[test]
        fn test_timeout_error_properties(millis in 1u64..3_600_000u64) {
            let error = Error::Timeout { millis };

            prop_assert_eq!(error.kind(), ErrorKind::Timeout);
            prop_assert_eq!(error.severity(), ErrorSeverity::Medium);
            prop_assert!(error.should_retry());
        }
    }

    #[rstest]
    #[case(Error::transfer("connection reset"), true)]
    #[case(Error::declined(503, "Service Unavailable"), true)]
    #[case(Error::file_reason("/tmp/x", "locked"), false)]
    #[case(Error::argument("empty url"), false)]
    #[case(Error::Cancelled, false)]
    #[case(Error::RetriesExceeded { attempts: 3 }, false)]
    fn test_should_retry(#[case] error: Error, #[case] expected: bool) {
        assert_eq!(error.should_retry(), expected);
    }

    #[test]
    fn test_admission_errors_share_kind() {
        assert_eq!(Error::EngineStopped.kind(), ErrorKind::Admission);
        assert_eq!(Error::QueueFull { capacity: 4 }.kind(), ErrorKind::Admission);
        assert_eq!(
            Error::DuplicateTask { id: TaskId::new(1) }.kind(),
            ErrorKind::Admission
        );
    }

    #[test]
    fn test_display_messages() {
        let error = Error::DuplicateTask { id: TaskId::new(42) };
        assert_eq!(error.to_string(), "Task 42 is already queued or running");

        let error = Error::file_reason("/data/out.bin", "already exists");
        assert!(error.to_string().contains("/data/out.bin"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "test file");
        let error = Error::from(io_error);

        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(error.to_string().contains("test file"));
    }

    #[test]
    fn test_cancelled_error() {
        let error = Error::Cancelled;

        assert!(error.is_cancelled());
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert!(!error.should_retry());
    }
}
