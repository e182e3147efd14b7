//! Shared helpers: test data, contexts and event collection

use courier_config::Config;
use courier_engine::MemoryQueue;
use courier_transfer::{ChannelListener, TransferContext, TransferEvent, TransferState};
use courier_types::{TaskId, WorkerCount};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Test data generation patterns
#[derive(Debug, Clone, Copy)]
pub enum TestDataPattern {
    /// All zeros
    Zeros,
    /// Deterministic bytes with a short period
    Realistic,
}

/// Generate `size` bytes following `pattern`
pub fn generate_test_data(size: usize, pattern: TestDataPattern) -> Vec<u8> {
    match pattern {
        TestDataPattern::Zeros => vec![0u8; size],
        TestDataPattern::Realistic => (0..size).map(|i| ((i * 7 + 13) % 251) as u8).collect(),
    }
}

/// Create a file in `temp_dir` holding generated data
pub fn create_test_file(
    temp_dir: &TempDir,
    name: &str,
    size: usize,
    pattern: TestDataPattern,
) -> PathBuf {
    let path = temp_dir.path().join(name);
    std::fs::write(&path, generate_test_data(size, pattern)).expect("write test file");
    path
}

/// Configuration with `workers` workers and the given queue capacity
pub fn test_config(workers: usize, queue_capacity: usize) -> Config {
    let mut config = Config::default();
    config.engine.worker_count = WorkerCount::new(workers).expect("valid worker count");
    config.engine.queue_capacity = queue_capacity;
    config
}

/// A started context plus an unthrottled event stream
pub fn start_context(config: &Config) -> (TransferContext, UnboundedReceiver<TransferEvent>) {
    let context =
        TransferContext::start(config, Arc::new(MemoryQueue::new())).expect("start context");
    let (listener, events) = ChannelListener::new();
    context.add_listener(Arc::new(listener.with_interval(Duration::ZERO)));
    (context, events)
}

/// Collect events of `id` until its final state, failing after ten seconds
pub async fn collect_until_finished(
    events: &mut UnboundedReceiver<TransferEvent>,
    id: TaskId,
) -> Vec<TransferEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => panic!("transfer {} did not finish, got {:?}", id, states(&collected)),
            event = events.recv() => {
                let event = event.expect("event channel closed");
                if event.id() != id {
                    continue;
                }
                let finished = matches!(&event, TransferEvent::State { info, .. } if info.is_finished());
                collected.push(event);
                if finished {
                    return collected;
                }
            }
        }
    }
}

/// Wait for the first state event of `id` satisfying `predicate`
pub async fn wait_for_state<F>(
    events: &mut UnboundedReceiver<TransferEvent>,
    id: TaskId,
    predicate: F,
) -> TransferState
where
    F: Fn(TransferState) -> bool,
{
    let wait = async {
        while let Some(event) = events.recv().await {
            if let TransferEvent::State { id: event_id, state, .. } = event {
                if event_id == id && predicate(state) {
                    return state;
                }
            }
        }
        panic!("event channel closed");
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("state not reached")
}

/// States of the collected events, in order
pub fn states(events: &[TransferEvent]) -> Vec<TransferState> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::State { state, .. } => Some(*state),
            TransferEvent::Response { .. } => None,
        })
        .collect()
}

/// States with runs of repeated progress states collapsed
pub fn collapsed_states(events: &[TransferEvent]) -> Vec<TransferState> {
    let mut collapsed: Vec<TransferState> = Vec::new();
    for state in states(events) {
        if state.is_progress() && collapsed.last() == Some(&state) {
            continue;
        }
        collapsed.push(state);
    }
    collapsed
}

/// The response events among the collected ones
pub fn responses(events: &[TransferEvent]) -> Vec<courier_transfer::Response> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::Response { response, .. } => Some(response.clone()),
            TransferEvent::State { .. } => None,
        })
        .collect()
}
