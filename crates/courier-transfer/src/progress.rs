//! Per-attempt transfer counters and derived speed, ETA and percentage

use std::time::Duration;

/// Byte counters of one direction (upload or download)
///
/// Speeds are in bytes per millisecond of active time, which excludes time
/// spent inside listener callbacks. Bytes present before a resumed download
/// count towards `transferred` but not towards the speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseProgress {
    transferred: u64,
    start: u64,
    total: Option<u64>,
    active: Duration,
}

impl PhaseProgress {
    /// Bytes transferred so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Expected total bytes, if known
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Active time spent in this phase
    pub fn elapsed(&self) -> Duration {
        self.active
    }

    /// Whether the transferred count has reached a known total
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.transferred >= total)
    }

    /// Bytes per millisecond of active time
    pub fn speed(&self) -> f64 {
        let millis = self.active.as_micros() as f64 / 1000.0;
        if millis > 0.0 {
            self.transferred.saturating_sub(self.start) as f64 / millis
        } else {
            0.0
        }
    }

    /// Estimated remaining time; zero when the speed or the total is unknown
    pub fn eta(&self) -> Duration {
        let speed = self.speed();
        match self.total {
            Some(total) if speed > 0.0 => {
                let remaining = total.saturating_sub(self.transferred) as f64;
                Duration::from_secs_f64(remaining / speed / 1000.0)
            }
            _ => Duration::ZERO,
        }
    }

    /// Completion percentage in `0.0..=100.0`; zero when the total is unknown
    pub fn percentage(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.transferred as f64 / total as f64 * 100.0).min(100.0),
            _ => 0.0,
        }
    }

    pub(crate) fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    pub(crate) fn set_transferred(&mut self, transferred: u64, active: Duration) {
        self.transferred = self.transferred.max(transferred);
        self.active = active;
    }

    pub(crate) fn restart_at(&mut self, offset: u64) {
        self.transferred = offset;
        self.start = offset;
    }
}

/// Counters of one submission, reset at the start of every attempt
///
/// Only [`TransferProcessInfo::retries`] accumulates across attempts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferProcessInfo {
    retries: u32,
    attempt: u32,
    upload: PhaseProgress,
    download: PhaseProgress,
    resume_offset: u64,
    finished: bool,
}

impl TransferProcessInfo {
    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Current attempt, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upload counters of the current attempt
    pub fn upload(&self) -> &PhaseProgress {
        &self.upload
    }

    /// Download counters of the current attempt
    pub fn download(&self) -> &PhaseProgress {
        &self.download
    }

    /// Byte offset the current download resumed from
    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    /// Whether the state carrying this snapshot ends the submission
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.upload = PhaseProgress::default();
        self.download = PhaseProgress::default();
        self.resume_offset = 0;
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub(crate) fn set_finished(&mut self) {
        self.finished = true;
    }

    pub(crate) fn set_resume_offset(&mut self, offset: u64) {
        self.resume_offset = offset;
    }

    pub(crate) fn upload_mut(&mut self) -> &mut PhaseProgress {
        &mut self.upload
    }

    pub(crate) fn download_mut(&mut self) -> &mut PhaseProgress {
        &mut self.download
    }
}
