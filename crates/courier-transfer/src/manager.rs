//! The transfer task: one parametrized attempt loop for uploads and downloads

use crate::body::{charset_from_content_type, decode_text, new_boundary, UploadBody};
use crate::files::{
    filename_from_content_disposition, filename_from_url, Destination, FileLocks,
    FALLBACK_FILE_NAME,
};
use crate::listener::ListenerRegistry;
use crate::reporter::TransferReporter;
use crate::request::{DownloadTarget, TransferRequest};
use crate::response::{parse_http_date, Response, ResponseBody, ResponseStatus};
use crate::settings::{DeclinedPolicy, DownloadWriteMode, ReadBodyMode, TransferSettings};
use crate::state::TransferState;
use async_trait::async_trait;
use bytes::Bytes;
use courier_engine::{Runnable, TaskDescriptor};
use courier_types::{Error, Result, RetryLimit, TaskRecord};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, DATE, RANGE};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Kind tag of transfer records in the durable queue
pub const TRANSFER_TASK_KIND: &str = "transfer";

/// Upper bound on the buffer reserved up front for in-memory bodies
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// State shared by every transfer of one context
pub(crate) struct TransferShared {
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) locks: Arc<FileLocks>,
}

/// A transfer request scheduled on the task engine
pub struct TransferTask {
    descriptor: TaskDescriptor,
    request: Arc<TransferRequest>,
    shared: Arc<TransferShared>,
}

impl TransferTask {
    pub(crate) fn new(request: TransferRequest, shared: Arc<TransferShared>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(request.id, request.label()),
            request: Arc::new(request),
            shared,
        }
    }

    /// Rebuild a task from its durable record
    pub(crate) fn from_record(record: &TaskRecord, shared: Arc<TransferShared>) -> Result<Self> {
        if record.kind != TRANSFER_TASK_KIND {
            return Err(Error::persistence(format!(
                "Record {} has unknown kind '{}'",
                record.id, record.kind
            )));
        }
        let request: TransferRequest = serde_json::from_str(&record.payload)
            .map_err(|e| Error::persistence(format!("Corrupt record {}: {}", record.id, e)))?;
        Ok(Self::new(request, shared))
    }

    /// The request this task carries
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    fn reporter(&self) -> TransferReporter {
        TransferReporter::new(Arc::clone(&self.request), Arc::clone(&self.shared.listeners))
    }

    fn settings(&self) -> &TransferSettings {
        &self.request.settings
    }

    async fn run_attempts(&self, reporter: &mut TransferReporter) -> Result<()> {
        let settings = self.settings();
        let client = match build_client(settings) {
            Ok(client) => client,
            Err(e) => {
                reporter.finish(TransferState::Failed, Some(&e));
                return Err(e);
            }
        };
        let mut written: Option<PathBuf> = None;

        loop {
            if self.descriptor.is_cancelled() {
                return self.finish_cancelled(reporter);
            }
            reporter.begin_attempt();
            reporter.update(TransferState::Starting, None);

            let error = match self.attempt(&client, reporter, &mut written).await {
                Ok(()) => {
                    info!("Transfer {} completed", self.request.label());
                    reporter.finish(TransferState::Success, None);
                    return Ok(());
                }
                Err(e) => e,
            };

            if error.is_cancelled() || self.descriptor.is_cancelled() {
                return self.finish_cancelled(reporter);
            }

            let retries = reporter.info().retries();
            let terminal = match &error {
                Error::FileReason { .. } => Some(TransferState::FailedFileReason),
                Error::Argument { .. } => Some(TransferState::Failed),
                Error::Declined { .. } if settings.declined_policy == DeclinedPolicy::Fail => {
                    Some(TransferState::Failed)
                }
                _ if settings.retry_limit.allows_retry(retries) => None,
                _ if settings.retry_limit == RetryLimit::None => Some(TransferState::Failed),
                _ => Some(TransferState::FailedRetriesExceeded),
            };

            if let Some(state) = terminal {
                self.cleanup_partial(written.take()).await;
                let error = if state == TransferState::FailedRetriesExceeded {
                    Error::RetriesExceeded {
                        attempts: reporter.info().attempt(),
                    }
                } else {
                    error
                };
                warn!("Transfer {} ended with {}: {}", self.request.label(), state, error);
                reporter.finish(state, Some(&error));
                return Err(error);
            }

            warn!(
                "Attempt {} of {} failed: {}",
                reporter.info().attempt(),
                self.request.label(),
                error
            );
            reporter.update(TransferState::Failed, Some(&error));

            tokio::select! {
                biased;
                _ = self.descriptor.cancelled() => return self.finish_cancelled(reporter),
                _ = tokio::time::sleep(settings.retry_delay) => {}
            }
            reporter.info_mut().record_retry();
        }
    }

    fn finish_cancelled(&self, reporter: &mut TransferReporter) -> Result<()> {
        debug!("Transfer {} cancelled", self.request.label());
        reporter.finish(TransferState::Cancelled, Some(&Error::Cancelled));
        Err(Error::Cancelled)
    }

    async fn cleanup_partial(&self, written: Option<PathBuf>) {
        let settings = self.settings();
        if !settings.delete_partial_on_failure
            || settings.write_mode == DownloadWriteMode::ResumeDownload
        {
            return;
        }
        if let Some(path) = written {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Could not remove partial file {}: {}", path.display(), e);
            }
        }
    }

    /// One end-to-end try: resolve files, send, classify, read, report
    async fn attempt(
        &self,
        client: &reqwest::Client,
        reporter: &mut TransferReporter,
        written: &mut Option<PathBuf>,
    ) -> Result<()> {
        let request = &*self.request;
        let settings = self.settings();
        let cancel = self.descriptor.cancellation_token().clone();
        let url = request.parsed_url()?;
        let reads_to_file = settings.read_body_mode == ReadBodyMode::File;

        let resuming = settings.write_mode == DownloadWriteMode::ResumeDownload;
        let mut destination = match written.as_ref() {
            // A retry takes over the file its earlier attempt claimed
            Some(path) if reads_to_file && !resuming => Some(Destination::reclaim(path.clone())),
            _ if reads_to_file => self.plan_before_request(&url).await?,
            _ => None,
        };
        let body = UploadBody::prepare(request, &new_boundary()).await?;

        reporter.update(TransferState::Connecting, None);
        let mut builder = client.request(request.method.as_reqwest(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = body.content_type() {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(offset) = destination.as_ref().map(|d| d.offset).filter(|o| *o > 0) {
            reporter.info_mut().set_resume_offset(offset);
            builder = builder.header(RANGE, format!("bytes={}-", offset));
        }

        let has_body = !body.is_empty();
        let upload_total = body.content_length();
        let (progress_tx, mut progress_rx) = watch::channel(0u64);
        if has_body {
            reporter.info_mut().upload_mut().set_total(Some(upload_total));
            let stream = body.into_stream(settings.chunk_size.get(), cancel.clone(), progress_tx);
            builder = builder
                .header(CONTENT_LENGTH, upload_total)
                .body(reqwest::Body::wrap_stream(stream));
        } else {
            drop(progress_tx);
        }

        reporter.begin_phase();
        let read_timeout = settings.timeouts.read_timeout;
        let send = builder.send();
        let idle = tokio::time::sleep(read_timeout);
        tokio::pin!(send, idle);
        let mut watching = has_body;
        let mut reported = 0u64;
        // Silence is bounded by the read timeout until the headers arrive
        let response = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = &mut send => break result.map_err(|e| transport_error(&e, settings))?,
                changed = progress_rx.changed(), if watching => {
                    if changed.is_ok() {
                        reported = *progress_rx.borrow_and_update();
                        reporter.upload_progress(reported, settings.notify_write);
                        idle.as_mut().reset(tokio::time::Instant::now() + read_timeout);
                    } else {
                        watching = false;
                    }
                }
                () = &mut idle => {
                    debug!("{} sent no response within {:?}", request.label(), read_timeout);
                    return Err(Error::Timeout { millis: millis(read_timeout) });
                }
            }
        };
        if has_body {
            let sent = *progress_rx.borrow();
            if sent != reported {
                reporter.upload_progress(sent, settings.notify_write);
            }
        }

        let status = response.status();
        let code = status.as_u16();
        let accepted = request.accepts(code);
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        };
        let content_type = header(CONTENT_TYPE.as_str());
        let content_disposition = header(CONTENT_DISPOSITION.as_str());
        let date = header(DATE.as_str()).and_then(|d| parse_http_date(&d));
        let content_length = response
            .content_length()
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);
        debug!("{} answered {}", request.label(), code);

        let body = if accepted && reads_to_file {
            let mut destination = match destination.take() {
                Some(destination) => destination,
                None => self.plan_after_response(&url, content_disposition.as_deref()).await?,
            };
            if destination.offset > 0 && status != StatusCode::PARTIAL_CONTENT {
                debug!("Server ignored the range request, restarting {}", destination.path.display());
                destination.restart();
            }
            reporter.info_mut().set_resume_offset(destination.offset);
            let _guard = self.shared.locks.try_lock(&destination.path)?;
            *written = Some(destination.path.clone());
            self.read_to_file(response, &destination, reporter, &cancel).await?;
            ResponseBody::File(destination.path)
        } else {
            let bytes = self.read_to_memory(response, reporter, &cancel, accepted).await?;
            if settings.read_body_mode == ReadBodyMode::ByteArray {
                ResponseBody::Bytes(bytes)
            } else {
                let charset = content_type
                    .as_deref()
                    .and_then(charset_from_content_type)
                    .unwrap_or(&settings.download_charset);
                let text = decode_text(&bytes, charset)
                    .or_else(|_| decode_text(&bytes, &settings.download_charset))?;
                ResponseBody::Text(text)
            }
        };

        let message = status.canonical_reason().unwrap_or_default().to_string();
        let response = Response {
            status: if accepted {
                ResponseStatus::Accepted
            } else {
                ResponseStatus::Declined
            },
            code,
            message: message.clone(),
            headers,
            body,
            content_type,
            content_length,
            date,
        };
        reporter.response(&response);

        if !accepted {
            return Err(Error::declined(code, message));
        }
        if settings.delete_source_on_success {
            for path in request.body.source_files() {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Could not delete uploaded file {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Destination known before connecting: explicit files, and resumable partials
    async fn plan_before_request(&self, url: &Url) -> Result<Option<Destination>> {
        let mode = self.settings().write_mode;
        match &self.request.download {
            Some(DownloadTarget::File(path)) => Destination::plan(path.clone(), mode).await.map(Some),
            Some(DownloadTarget::Directory(dir)) if mode == DownloadWriteMode::ResumeDownload => {
                let Some(name) = filename_from_url(url) else {
                    return Ok(None);
                };
                let path = dir.join(name);
                match tokio::fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {
                        Destination::plan(path, mode).await.map(Some)
                    }
                    _ => Ok(None),
                }
            }
            Some(DownloadTarget::Directory(_)) => Ok(None),
            None => Err(Error::argument("Reading the body into a file requires a download target")),
        }
    }

    /// Name a directory download from the response, then the URL
    async fn plan_after_response(
        &self,
        url: &Url,
        content_disposition: Option<&str>,
    ) -> Result<Destination> {
        let Some(DownloadTarget::Directory(dir)) = &self.request.download else {
            return Err(Error::argument("Download target is not a directory"));
        };
        let name = content_disposition
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        // No range was requested, so an existing file cannot be appended to
        let mode = match self.settings().write_mode {
            DownloadWriteMode::ResumeDownload => DownloadWriteMode::Overwrite,
            mode => mode,
        };
        Destination::plan(dir.join(name), mode).await
    }

    async fn read_to_file(
        &self,
        mut response: reqwest::Response,
        destination: &Destination,
        reporter: &mut TransferReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let settings = self.settings();
        let offset = destination.offset;
        let download = reporter.info_mut().download_mut();
        download.set_total(response.content_length().map(|len| len + offset));
        download.restart_at(offset);

        let mut file = destination.open().await?;
        let write_error =
            |e: std::io::Error| Error::file_reason(&destination.path, format!("Write failed: {}", e));

        reporter.begin_phase();
        let mut transferred = offset;
        while let Some(chunk) = next_chunk(&mut response, cancel, settings).await? {
            file.write_all(&chunk).await.map_err(write_error)?;
            transferred += chunk.len() as u64;
            reporter.download_progress(transferred, settings.notify_read);
        }
        file.flush().await.map_err(write_error)?;
        Ok(())
    }

    async fn read_to_memory(
        &self,
        mut response: reqwest::Response,
        reporter: &mut TransferReporter,
        cancel: &CancellationToken,
        notify: bool,
    ) -> Result<Vec<u8>> {
        let settings = self.settings();
        let total = response.content_length();
        reporter.info_mut().download_mut().set_total(total);
        let capacity = total.unwrap_or(0).min(MAX_PREALLOCATION);
        let mut buffer = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));

        reporter.begin_phase();
        while let Some(chunk) = next_chunk(&mut response, cancel, settings).await? {
            buffer.extend_from_slice(&chunk);
            reporter.download_progress(buffer.len() as u64, notify && settings.notify_read);
        }
        Ok(buffer)
    }
}

#[async_trait]
impl Runnable for TransferTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    fn record(&self) -> Result<TaskRecord> {
        let payload = serde_json::to_string(&*self.request)
            .map_err(|e| Error::persistence(format!("Cannot serialize transfer: {}", e)))?;
        Ok(TaskRecord::new(
            self.request.id,
            self.request.label(),
            TRANSFER_TASK_KIND,
            payload,
        ))
    }

    async fn run(&self) -> Result<()> {
        let mut reporter = self.reporter();
        self.run_attempts(&mut reporter).await
    }

    fn on_cancelled_before_start(&self) {
        self.reporter()
            .finish(TransferState::Cancelled, Some(&Error::Cancelled));
    }
}

fn build_client(settings: &TransferSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(settings.timeouts.connect_timeout);
    if let Some(agent) = &settings.user_agent {
        builder = builder.user_agent(agent.as_str());
    }
    builder
        .build()
        .map_err(|e| Error::transfer(format!("Cannot build HTTP client: {}", e)))
}

/// Next body chunk, bounded by the read timeout and interrupted by cancellation
async fn next_chunk(
    response: &mut reqwest::Response,
    cancel: &CancellationToken,
    settings: &TransferSettings,
) -> Result<Option<Bytes>> {
    let read_timeout = settings.timeouts.read_timeout;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        chunk = tokio::time::timeout(read_timeout, response.chunk()) => match chunk {
            Ok(chunk) => chunk.map_err(|e| transport_error(&e, settings)),
            Err(_) => Err(Error::Timeout { millis: millis(read_timeout) }),
        },
    }
}

/// Map a reqwest failure onto the transfer taxonomy, keeping the source chain
fn transport_error(error: &reqwest::Error, settings: &TransferSettings) -> Error {
    if error.is_timeout() {
        return Error::Timeout {
            millis: millis(settings.timeouts.connect_timeout),
        };
    }
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    Error::transfer(message)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, TransferEvent};
    use courier_types::TaskId;

    fn shared() -> Arc<TransferShared> {
        Arc::new(TransferShared {
            listeners: Arc::new(ListenerRegistry::default()),
            locks: Arc::new(FileLocks::new()),
        })
    }

    #[test]
    fn test_record_round_trip() {
        let request = TransferRequest::new(TaskId::new(9), "http://localhost/a")
            .with_header("X-Trace", "1");
        let task = TransferTask::new(request.clone(), shared());
        let record = task.record().unwrap();
        assert_eq!(record.kind, TRANSFER_TASK_KIND);
        assert_eq!(record.name, "GET http://localhost/a");

        let rebuilt = TransferTask::from_record(&record, shared()).unwrap();
        assert_eq!(rebuilt.request(), &request);
        assert_eq!(rebuilt.descriptor().id(), TaskId::new(9));
    }

    #[test]
    fn test_unknown_record_kind_rejected() {
        let record = TaskRecord::new(TaskId::new(1), "x", "other", "{}");
        assert!(matches!(
            TransferTask::from_record(&record, shared()),
            Err(Error::Persistence { .. })
        ));
    }

    #[test]
    fn test_cancelled_before_start_reports_cancelled() {
        let shared = shared();
        let (listener, mut rx) = ChannelListener::new();
        shared.listeners.add(Arc::new(listener));
        let task = TransferTask::new(
            TransferRequest::new(TaskId::new(2), "http://localhost/"),
            Arc::clone(&shared),
        );
        task.on_cancelled_before_start();

        match rx.try_recv().unwrap() {
            TransferEvent::State { state, error, info, .. } => {
                assert_eq!(state, TransferState::Cancelled);
                assert_eq!(error, Some(Error::Cancelled));
                assert!(info.is_finished());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_upload_source_fails_with_file_reason() {
        let shared = shared();
        let (listener, mut rx) = ChannelListener::new();
        shared.listeners.add(Arc::new(listener));
        let request = TransferRequest::upload(TaskId::new(3), "http://127.0.0.1:9/up")
            .with_file("f", "/no/such/file.bin")
            .with_settings(TransferSettings {
                retry_limit: RetryLimit::Unlimited,
                ..TransferSettings::upload_preset()
            });
        let task = TransferTask::new(request, shared);

        let err = task.run().await.unwrap_err();
        assert!(matches!(err, Error::FileReason { .. }));

        let mut states = Vec::new();
        while let Ok(TransferEvent::State { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(
            states,
            vec![TransferState::Starting, TransferState::FailedFileReason]
        );
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        let request = TransferRequest::new(TaskId::new(4), "http://127.0.0.1:9/").with_settings(
            TransferSettings {
                retry_limit: RetryLimit::limited(2),
                retry_delay: Duration::from_millis(1),
                ..TransferSettings::default()
            },
        );
        let task = TransferTask::new(request, shared());
        let err = task.run().await.unwrap_err();
        assert_eq!(err, Error::RetriesExceeded { attempts: 3 });
    }
}
