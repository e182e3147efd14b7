//! Transfer states reported to listeners

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one transfer submission
///
/// Within one attempt states only move forward:
/// `Starting → Connecting → Uploading* → Downloading* → outcome`.
/// `Failed` is reported between attempts while retries remain and as the final
/// state when no retries are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// An attempt is starting
    Starting,
    /// Connecting and sending request headers
    Connecting,
    /// Writing the request body
    Uploading,
    /// Reading the response body
    Downloading,
    /// Completed with an accepted response
    Success,
    /// An attempt failed
    Failed,
    /// Every allowed attempt failed
    FailedRetriesExceeded,
    /// A local file could not be created, opened or locked
    FailedFileReason,
    /// Cancelled by the caller
    Cancelled,
}

impl TransferState {
    /// Progress sub-states, subject to notification throttling
    pub fn is_progress(self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }

    /// States that can only ever end a submission
    pub fn is_always_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::FailedRetriesExceeded | Self::FailedFileReason | Self::Cancelled
        )
    }

    /// States covered by the duplicate-failure latch
    pub fn is_latched(self) -> bool {
        matches!(self, Self::Failed | Self::FailedFileReason)
    }

    /// Position within an attempt, used to keep notifications monotonic
    pub(crate) fn phase(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Connecting => 1,
            Self::Uploading => 2,
            Self::Downloading => 3,
            _ => 4,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Connecting => "CONNECTING",
            Self::Uploading => "UPLOADING",
            Self::Downloading => "DOWNLOADING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::FailedRetriesExceeded => "FAILED_RETRIES_EXCEEDED",
            Self::FailedFileReason => "FAILED_FILE_REASON",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(TransferState::Downloading.is_progress());
        assert!(!TransferState::Connecting.is_progress());
        assert!(TransferState::Cancelled.is_always_terminal());
        assert!(!TransferState::Failed.is_always_terminal());
        assert!(TransferState::FailedFileReason.is_latched());
        assert_eq!(
            TransferState::FailedRetriesExceeded.to_string(),
            "FAILED_RETRIES_EXCEEDED"
        );
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(TransferState::Starting.phase() < TransferState::Connecting.phase());
        assert!(TransferState::Uploading.phase() < TransferState::Downloading.phase());
        assert!(TransferState::Downloading.phase() < TransferState::Success.phase());
    }
}
