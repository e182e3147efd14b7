//! Per-submission notification dispatch: ordering, dedup latch and throttling

use crate::listener::{ListenerEntry, ListenerRegistry};
use crate::progress::TransferProcessInfo;
use crate::request::TransferRequest;
use crate::response::Response;
use crate::state::TransferState;
use courier_types::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keeps the state stream of one submission monotonic and free of repeats
#[derive(Debug, Default)]
struct DispatchLatch {
    last: Option<TransferState>,
    phase: u8,
    finished: bool,
}

impl DispatchLatch {
    fn begin_attempt(&mut self) {
        self.phase = 0;
    }

    fn admit(&mut self, state: TransferState, terminal: bool) -> bool {
        if self.finished {
            return false;
        }
        if terminal {
            self.finished = true;
        }
        if state.is_latched() && self.last == Some(state) {
            return false;
        }
        if state.phase() < self.phase {
            return false;
        }
        self.phase = state.phase();
        self.last = Some(state);
        true
    }
}

/// Owns the process info of one submission and fans notifications out
pub(crate) struct TransferReporter {
    request: Arc<TransferRequest>,
    registry: Arc<ListenerRegistry>,
    info: TransferProcessInfo,
    latch: DispatchLatch,
    phase_started: Instant,
    callback_time: Duration,
}

impl TransferReporter {
    pub(crate) fn new(request: Arc<TransferRequest>, registry: Arc<ListenerRegistry>) -> Self {
        Self {
            request,
            registry,
            info: TransferProcessInfo::default(),
            latch: DispatchLatch::default(),
            phase_started: Instant::now(),
            callback_time: Duration::ZERO,
        }
    }

    pub(crate) fn info(&self) -> &TransferProcessInfo {
        &self.info
    }

    pub(crate) fn info_mut(&mut self) -> &mut TransferProcessInfo {
        &mut self.info
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.info.begin_attempt();
        self.latch.begin_attempt();
    }

    /// Restart the active-time clock used for speed computation
    pub(crate) fn begin_phase(&mut self) {
        self.phase_started = Instant::now();
        self.callback_time = Duration::ZERO;
    }

    fn active_elapsed(&self) -> Duration {
        self.phase_started
            .elapsed()
            .saturating_sub(self.callback_time)
    }

    /// Report a non-final state
    pub(crate) fn update(&mut self, state: TransferState, error: Option<&Error>) {
        if self.latch.admit(state, false) {
            self.dispatch_state(state, error);
        }
    }

    /// Report the final state of the submission
    pub(crate) fn finish(&mut self, state: TransferState, error: Option<&Error>) {
        self.info.set_finished();
        if self.latch.admit(state, true) {
            self.dispatch_state(state, error);
        }
        self.registry.forget(self.request.id);
    }

    pub(crate) fn upload_progress(&mut self, transferred: u64, notify: bool) {
        let active = self.active_elapsed();
        self.info.upload_mut().set_transferred(transferred, active);
        if notify {
            let complete = self.info.upload().is_complete();
            self.dispatch_progress(TransferState::Uploading, complete);
        }
    }

    pub(crate) fn download_progress(&mut self, transferred: u64, notify: bool) {
        let active = self.active_elapsed();
        self.info.download_mut().set_transferred(transferred, active);
        if notify {
            let complete = self.info.download().is_complete();
            self.dispatch_progress(TransferState::Downloading, complete);
        }
    }

    pub(crate) fn response(&mut self, response: &Response) {
        let started = Instant::now();
        for entry in self.snapshot() {
            entry
                .listener()
                .on_response(&self.request, &self.info, response);
        }
        self.callback_time += started.elapsed();
    }

    fn snapshot(&self) -> Vec<Arc<ListenerEntry>> {
        self.registry.snapshot_for(self.request.id)
    }

    fn dispatch_state(&mut self, state: TransferState, error: Option<&Error>) {
        let started = Instant::now();
        for entry in self.snapshot() {
            entry
                .listener()
                .on_update_state(state, &self.request, &self.info, error);
        }
        self.callback_time += started.elapsed();
    }

    fn dispatch_progress(&mut self, state: TransferState, complete: bool) {
        if !self.latch.admit(state, false) {
            return;
        }
        let started = Instant::now();
        let id = self.request.id;
        for entry in self.snapshot() {
            if entry.progress_due(id, started, complete) {
                entry
                    .listener()
                    .on_update_state(state, &self.request, &self.info, None);
            }
        }
        self.callback_time += started.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::TransferListener;
    use courier_types::TaskId;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(TransferState, u64)>>,
    }

    impl TransferListener for Recorder {
        fn on_update_state(
            &self,
            state: TransferState,
            _request: &TransferRequest,
            info: &TransferProcessInfo,
            _error: Option<&Error>,
        ) {
            self.states
                .lock()
                .push((state, info.download().transferred()));
        }

        fn min_notify_interval(&self) -> Option<Duration> {
            Some(Duration::from_secs(3600))
        }
    }

    fn reporter() -> (TransferReporter, Arc<Recorder>) {
        let registry = Arc::new(ListenerRegistry::default());
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());
        let request = Arc::new(TransferRequest::new(TaskId::new(1), "http://localhost/"));
        (TransferReporter::new(request, registry), recorder)
    }

    fn states(recorder: &Recorder) -> Vec<TransferState> {
        recorder.states.lock().iter().map(|(s, _)| *s).collect()
    }

    #[test]
    fn test_duplicate_failure_is_suppressed() {
        let (mut reporter, recorder) = reporter();
        reporter.begin_attempt();
        reporter.update(TransferState::Starting, None);
        reporter.update(TransferState::Failed, None);
        reporter.update(TransferState::Failed, None);
        reporter.begin_attempt();
        reporter.update(TransferState::Starting, None);
        reporter.update(TransferState::Failed, None);

        assert_eq!(
            states(&recorder),
            vec![
                TransferState::Starting,
                TransferState::Failed,
                TransferState::Starting,
                TransferState::Failed,
            ]
        );
    }

    #[test]
    fn test_nothing_after_final_state() {
        let (mut reporter, recorder) = reporter();
        reporter.begin_attempt();
        reporter.update(TransferState::Starting, None);
        reporter.finish(TransferState::Cancelled, Some(&Error::Cancelled));
        reporter.update(TransferState::Connecting, None);
        reporter.finish(TransferState::Success, None);

        assert_eq!(
            states(&recorder),
            vec![TransferState::Starting, TransferState::Cancelled]
        );
        assert!(reporter.info().is_finished());
    }

    #[test]
    fn test_progress_throttled_but_completion_always_sent() {
        let (mut reporter, recorder) = reporter();
        reporter.begin_attempt();
        reporter.info_mut().download_mut().set_total(Some(300));
        reporter.begin_phase();
        reporter.download_progress(100, true);
        reporter.download_progress(200, true);
        reporter.download_progress(300, true);

        let recorded = recorder.states.lock().clone();
        assert_eq!(
            recorded,
            vec![
                (TransferState::Downloading, 100),
                (TransferState::Downloading, 300),
            ]
        );
    }

    #[test]
    fn test_progress_never_goes_backwards_in_phase() {
        let (mut reporter, recorder) = reporter();
        reporter.begin_attempt();
        reporter.update(TransferState::Connecting, None);
        reporter.download_progress(10, true);
        reporter.upload_progress(10, true);
        reporter.update(TransferState::Starting, None);

        assert_eq!(
            states(&recorder),
            vec![TransferState::Connecting, TransferState::Downloading]
        );
    }
}
