//! Per-request transfer settings

use courier_config::TransferDefaults;
use courier_types::config::duration_millis;
use courier_types::{ChunkSize, Error, Result, RetryLimit, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the download destination already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadWriteMode {
    /// Truncate and rewrite the file
    #[default]
    Overwrite,
    /// Pick a free name by appending ` (n)` before the extension
    CreateNew,
    /// Request the remaining byte range and append
    ResumeDownload,
    /// Fail with a file error
    DoNothing,
}

/// Where an accepted response body is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadBodyMode {
    /// Keep the raw bytes in memory
    #[default]
    ByteArray,
    /// Decode the body as text
    String,
    /// Stream the body into the download destination
    File,
}

/// How a response outside the accepted codes is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclinedPolicy {
    /// Treat like a transport failure and retry within the retry limit
    #[default]
    Retry,
    /// Finish immediately with `Failed` without consuming a retry
    Fail,
}

/// Settings controlling one transfer submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Connection and per-chunk read timeouts
    pub timeouts: TimeoutConfig,
    /// How many times a failed attempt may be repeated
    pub retry_limit: RetryLimit,
    /// Delay before each retry
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// Report `Uploading` progress
    pub notify_write: bool,
    /// Report `Downloading` progress
    pub notify_read: bool,
    /// Collision policy for the download destination
    pub write_mode: DownloadWriteMode,
    /// Where the accepted response body goes
    pub read_body_mode: ReadBodyMode,
    /// Charset used to encode text request bodies and form fields
    pub upload_charset: String,
    /// Charset used to decode text responses without a declared charset
    pub download_charset: String,
    /// I/O chunk size; bounds cancellation latency
    pub chunk_size: ChunkSize,
    /// Treatment of declined responses
    pub declined_policy: DeclinedPolicy,
    /// Delete uploaded source files after success
    pub delete_source_on_success: bool,
    /// Delete a partial download when the submission fails, unless resuming
    pub delete_partial_on_failure: bool,
    /// User agent header, if any
    pub user_agent: Option<String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry_limit: RetryLimit::None,
            retry_delay: Duration::from_secs(1),
            notify_write: true,
            notify_read: true,
            write_mode: DownloadWriteMode::Overwrite,
            read_body_mode: ReadBodyMode::ByteArray,
            upload_charset: "utf-8".to_string(),
            download_charset: "utf-8".to_string(),
            chunk_size: ChunkSize::default(),
            declined_policy: DeclinedPolicy::Retry,
            delete_source_on_success: false,
            delete_partial_on_failure: true,
            user_agent: None,
        }
    }
}

impl TransferSettings {
    /// Seed settings from configured defaults
    pub fn from_defaults(defaults: &TransferDefaults) -> Self {
        Self {
            timeouts: defaults.timeouts,
            retry_limit: defaults.retry_limit,
            retry_delay: defaults.retry_delay,
            chunk_size: defaults.chunk_size,
            user_agent: Some(defaults.user_agent.clone()),
            ..Self::default()
        }
    }

    /// Settings for downloads: body streamed to a file, resumable
    pub fn download_preset() -> Self {
        Self {
            read_body_mode: ReadBodyMode::File,
            write_mode: DownloadWriteMode::ResumeDownload,
            notify_write: false,
            ..Self::default()
        }
    }

    /// Settings for uploads: declined responses end the submission at once
    pub fn upload_preset() -> Self {
        Self {
            read_body_mode: ReadBodyMode::String,
            declined_policy: DeclinedPolicy::Fail,
            notify_read: false,
            ..Self::default()
        }
    }

    /// Check the settings for values that can never work
    pub fn validate(&self) -> Result<()> {
        for label in [&self.upload_charset, &self.download_charset] {
            if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
                return Err(Error::argument(format!("Unknown charset '{}'", label)));
            }
        }
        if self.timeouts.connect_timeout.is_zero() || self.timeouts.read_timeout.is_zero() {
            return Err(Error::argument("Timeouts must be greater than zero"));
        }
        Ok(())
    }
}
