//! Validated configuration values shared across Courier crates
//!
//! Each value type checks its bounds on construction so that engine and transfer
//! code can rely on them without re-validating.

use std::time::Duration;

/// Worker count with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Minimum worker count
    pub const MIN: usize = 1;
    /// Maximum worker count
    pub const MAX: usize = 256;

    /// Create a new worker count with validation
    pub fn new(count: usize) -> Result<Self, String> {
        if count < Self::MIN {
            Err(format!("Worker count {} is below minimum {}", count, Self::MIN))
        } else if count > Self::MAX {
            Err(format!("Worker count {} exceeds maximum {}", count, Self::MAX))
        } else {
            Ok(Self(count))
        }
    }

    /// Get the worker count value
    pub fn get(self) -> usize {
        self.0
    }

    /// Get the optimal worker count for the current system
    pub fn optimal() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self(cpu_count.clamp(Self::MIN, Self::MAX))
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self::optimal()
    }
}

impl TryFrom<usize> for WorkerCount {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerCount> for usize {
    fn from(value: WorkerCount) -> Self {
        value.0
    }
}

/// I/O chunk size; bounds both progress granularity and cancellation latency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct ChunkSize(usize);

impl ChunkSize {
    /// Minimum chunk size (1KB)
    pub const MIN: usize = 1024;
    /// Maximum chunk size (16MB)
    pub const MAX: usize = 16 * 1024 * 1024;
    /// Default chunk size (64KB)
    pub const DEFAULT: usize = 64 * 1024;

    /// Create a new chunk size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err(format!("Chunk size {} is below minimum {}", size, Self::MIN))
        } else if size > Self::MAX {
            Err(format!("Chunk size {} exceeds maximum {}", size, Self::MAX))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the chunk size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for ChunkSize {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChunkSize> for usize {
    fn from(value: ChunkSize) -> Self {
        value.0
    }
}

/// How many times a failed transfer attempt may be repeated
///
/// Serialized as a signed integer: `-1` is unlimited, `0` disables retries and
/// any positive `n` allows `n` retries after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "i64", into = "i64"))]
pub enum RetryLimit {
    /// Retry until success or cancellation
    Unlimited,
    /// Single attempt, never retried
    #[default]
    None,
    /// Up to this many retries after the first attempt
    Limited(u32),
}

impl RetryLimit {
    /// Create a limit allowing `retries` retries; zero collapses to [`RetryLimit::None`]
    pub fn limited(retries: u32) -> Self {
        if retries == 0 {
            Self::None
        } else {
            Self::Limited(retries)
        }
    }

    /// Total number of attempts allowed, `None` when unbounded
    pub fn max_attempts(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::None => Some(1),
            Self::Limited(retries) => Some(retries.saturating_add(1)),
        }
    }

    /// Whether another attempt is allowed after `retries_so_far` retries
    pub fn allows_retry(self, retries_so_far: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::None => false,
            Self::Limited(retries) => retries_so_far < retries,
        }
    }
}

impl TryFrom<i64> for RetryLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unlimited),
            0 => Ok(Self::None),
            n if n > 0 => u32::try_from(n)
                .map(Self::Limited)
                .map_err(|_| format!("Retry limit {} is too large", n)),
            n => Err(format!("Retry limit {} is invalid, use -1 for unlimited", n)),
        }
    }
}

impl From<RetryLimit> for i64 {
    fn from(value: RetryLimit) -> Self {
        match value {
            RetryLimit::Unlimited => -1,
            RetryLimit::None => 0,
            RetryLimit::Limited(n) => i64::from(n),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeoutConfig {
    /// Connection timeout
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub connect_timeout: Duration,
    /// Longest silence tolerated while waiting for response headers or the next chunk
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub read_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Serde adaptor storing a [`Duration`] as whole milliseconds
#[cfg(feature = "serde")]
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize a duration from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
