//! Transfer listeners, the listener registry and a channel-backed listener

use crate::progress::TransferProcessInfo;
use crate::request::TransferRequest;
use crate::response::Response;
use crate::state::TransferState;
use courier_types::{Error, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default minimum interval between two progress notifications
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_millis(2000);

/// Which submissions a listener wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerFilter {
    /// Every submission
    #[default]
    All,
    /// Only the submission with this id
    Id(TaskId),
}

impl ListenerFilter {
    /// Whether events of `id` pass the filter
    pub fn matches(self, id: TaskId) -> bool {
        match self {
            Self::All => true,
            Self::Id(wanted) => wanted == id,
        }
    }
}

/// Observer of transfer states and responses
pub trait TransferListener: Send + Sync {
    /// A state was reached; `error` is set for failure states
    fn on_update_state(
        &self,
        state: TransferState,
        request: &TransferRequest,
        info: &TransferProcessInfo,
        error: Option<&Error>,
    );

    /// A response was received, accepted or not
    fn on_response(
        &self,
        _request: &TransferRequest,
        _info: &TransferProcessInfo,
        _response: &Response,
    ) {
    }

    /// Submissions this listener wants
    fn filter(&self) -> ListenerFilter {
        ListenerFilter::All
    }

    /// Minimum interval between progress notifications; `None` uses the registry default
    fn min_notify_interval(&self) -> Option<Duration> {
        None
    }
}

/// A registered listener plus its per-submission throttle clock
pub(crate) struct ListenerEntry {
    listener: Arc<dyn TransferListener>,
    interval: Duration,
    last_progress: Mutex<HashMap<TaskId, Instant>>,
}

impl ListenerEntry {
    pub(crate) fn listener(&self) -> &dyn TransferListener {
        self.listener.as_ref()
    }

    pub(crate) fn matches(&self, id: TaskId) -> bool {
        self.listener.filter().matches(id)
    }

    /// Whether a progress notification for `id` is due now
    pub(crate) fn progress_due(&self, id: TaskId, now: Instant, complete: bool) -> bool {
        let mut last_progress = self.last_progress.lock();
        let due = complete
            || last_progress
                .get(&id)
                .map_or(true, |last| now.saturating_duration_since(*last) >= self.interval);
        if due {
            last_progress.insert(id, now);
        }
        due
    }

    pub(crate) fn forget(&self, id: TaskId) {
        self.last_progress.lock().remove(&id);
    }
}

/// Set of transfer listeners shared by every submission of a context
pub struct ListenerRegistry {
    default_interval: Duration,
    entries: Mutex<Vec<Arc<ListenerEntry>>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener
    pub fn add(&self, listener: Arc<dyn TransferListener>) {
        let interval = listener
            .min_notify_interval()
            .unwrap_or(self.default_interval);
        self.entries.lock().push(Arc::new(ListenerEntry {
            listener,
            interval,
            last_progress: Mutex::new(HashMap::new()),
        }));
    }

    /// Unregister a listener; returns whether it was registered
    pub fn remove(&self, listener: &Arc<dyn TransferListener>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| {
            !std::ptr::eq(
                Arc::as_ptr(&entry.listener).cast::<()>(),
                Arc::as_ptr(listener).cast::<()>(),
            )
        });
        entries.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listeners interested in `id`, copied out of the lock
    pub(crate) fn snapshot_for(&self, id: TaskId) -> Vec<Arc<ListenerEntry>> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.matches(id))
            .cloned()
            .collect()
    }

    /// Drop throttle state kept for a finished submission
    pub(crate) fn forget(&self, id: TaskId) {
        for entry in self.entries.lock().iter() {
            entry.forget(id);
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_INTERVAL)
    }
}

/// Event forwarded by a [`ChannelListener`]
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A state notification
    State {
        /// Submission id
        id: TaskId,
        /// Reached state
        state: TransferState,
        /// Counters at the time of the notification
        info: TransferProcessInfo,
        /// Failure cause, if any
        error: Option<Error>,
    },
    /// A response notification
    Response {
        /// Submission id
        id: TaskId,
        /// Counters at the time of the notification
        info: TransferProcessInfo,
        /// Received response
        response: Response,
    },
}

impl TransferEvent {
    /// Submission id of the event
    pub fn id(&self) -> TaskId {
        match self {
            Self::State { id, .. } | Self::Response { id, .. } => *id,
        }
    }
}

/// Listener forwarding every notification into an unbounded channel
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<TransferEvent>,
    filter: ListenerFilter,
    interval: Option<Duration>,
}

impl ChannelListener {
    /// Create a listener for all submissions and its receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                filter: ListenerFilter::All,
                interval: None,
            },
            receiver,
        )
    }

    /// Restrict the listener to one submission
    pub fn with_filter(mut self, filter: ListenerFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Override the progress notification interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl TransferListener for ChannelListener {
    fn on_update_state(
        &self,
        state: TransferState,
        request: &TransferRequest,
        info: &TransferProcessInfo,
        error: Option<&Error>,
    ) {
        // A closed receiver only means nobody is watching any more
        let _ = self.sender.send(TransferEvent::State {
            id: request.id,
            state,
            info: info.clone(),
            error: error.cloned(),
        });
    }

    fn on_response(&self, request: &TransferRequest, info: &TransferProcessInfo, response: &Response) {
        let _ = self.sender.send(TransferEvent::Response {
            id: request.id,
            info: info.clone(),
            response: response.clone(),
        });
    }

    fn filter(&self) -> ListenerFilter {
        self.filter
    }

    fn min_notify_interval(&self) -> Option<Duration> {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl TransferListener for Silent {
        fn on_update_state(
            &self,
            _state: TransferState,
            _request: &TransferRequest,
            _info: &TransferProcessInfo,
            _error: Option<&Error>,
        ) {
        }
    }

    #[test]
    fn test_filter_matches() {
        assert!(ListenerFilter::All.matches(TaskId::new(3)));
        assert!(ListenerFilter::Id(TaskId::new(3)).matches(TaskId::new(3)));
        assert!(!ListenerFilter::Id(TaskId::new(3)).matches(TaskId::new(4)));
    }

    #[test]
    fn test_progress_throttle() {
        let registry = ListenerRegistry::new(Duration::from_millis(100));
        registry.add(Arc::new(Silent));
        let entry = registry.snapshot_for(TaskId::new(1)).remove(0);
        let start = Instant::now();
        let id = TaskId::new(1);

        assert!(entry.progress_due(id, start, false));
        assert!(!entry.progress_due(id, start + Duration::from_millis(50), false));
        assert!(entry.progress_due(id, start + Duration::from_millis(60), true));
        assert!(!entry.progress_due(id, start + Duration::from_millis(120), false));
        assert!(entry.progress_due(id, start + Duration::from_millis(160), false));
        // Other submissions have their own clock
        assert!(entry.progress_due(TaskId::new(2), start + Duration::from_millis(161), false));
    }

    #[test]
    fn test_snapshot_respects_filter_and_removal() {
        let registry = ListenerRegistry::default();
        let (listener, _rx) = ChannelListener::new();
        let listener: Arc<dyn TransferListener> =
            Arc::new(listener.with_filter(ListenerFilter::Id(TaskId::new(5))));
        registry.add(Arc::clone(&listener));
        registry.add(Arc::new(Silent));

        assert_eq!(registry.snapshot_for(TaskId::new(5)).len(), 2);
        assert_eq!(registry.snapshot_for(TaskId::new(6)).len(), 1);

        assert!(registry.remove(&listener));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_channel_listener_forwards_events() {
        let (listener, mut rx) = ChannelListener::new();
        let request = TransferRequest::new(TaskId::new(8), "http://localhost/");
        listener.on_update_state(
            TransferState::Starting,
            &request,
            &TransferProcessInfo::default(),
            None,
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.id(), TaskId::new(8));
        assert!(matches!(
            event,
            TransferEvent::State {
                state: TransferState::Starting,
                ..
            }
        ));
    }
}
