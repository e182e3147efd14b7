//! Download behaviour: resume, collisions, progress, retries and cancellation

use courier_tests::*;
use courier_transfer::{
    DeclinedPolicy, DownloadTarget, DownloadWriteMode, ReadBodyMode, ResponseBody,
    TransferEvent, TransferRequest, TransferSettings, TransferState,
};
use courier_types::{Error, RetryLimit, TimeoutConfig};
use rstest::rstest;
use std::time::Duration;

const TOTAL: usize = 200_000;

fn download_settings(mode: DownloadWriteMode) -> TransferSettings {
    TransferSettings {
        write_mode: mode,
        ..TransferSettings::download_preset()
    }
}

/// File names and sizes left in `dir`, sorted by name
fn listing(dir: &std::path::Path) -> Vec<(String, usize)> {
    let mut files: Vec<(String, usize)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            let len = entry.metadata().unwrap().len() as usize;
            (entry.file_name().to_string_lossy().into_owned(), len)
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_resume_requests_remaining_range() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let full = served_data(TOTAL);
    let partial = 75_000;
    std::fs::write(&path, &full[..partial]).unwrap();
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url(&format!("/bytes/{}", TOTAL)),
        DownloadTarget::File(path.clone()),
    );
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    assert_eq!(states(&collected).last(), Some(&TransferState::Success));
    assert_eq!(
        server.log().ranges(),
        vec![Some(format!("bytes={}-", partial))]
    );
    assert_eq!(std::fs::read(&path).unwrap(), full);

    let response = &responses(&collected)[0];
    assert_eq!(response.code, 206);
    assert_eq!(response.body, ResponseBody::File(path));

    match collected.last().unwrap() {
        TransferEvent::State { info, .. } => {
            assert_eq!(info.resume_offset(), partial as u64);
            assert_eq!(info.download().transferred(), TOTAL as u64);
            assert_eq!(info.download().total(), Some(TOTAL as u64));
        }
        other => panic!("unexpected final event {:?}", other),
    }

    context.shutdown().await;
}

#[tokio::test]
async fn test_resume_restarts_when_range_is_ignored() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    std::fs::write(&path, vec![0xAA; 1000]).unwrap();
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/norange/5000"),
        DownloadTarget::File(path.clone()),
    );
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    assert_eq!(states(&collected).last(), Some(&TransferState::Success));
    assert_eq!(server.log().ranges(), vec![Some("bytes=1000-".to_string())]);
    assert_eq!(std::fs::read(&path).unwrap(), served_data(5000));

    context.shutdown().await;
}

#[rstest]
#[case(DownloadWriteMode::Overwrite, "report.txt")]
#[case(DownloadWriteMode::CreateNew, "report (1).txt")]
#[tokio::test]
async fn test_directory_target_uses_content_disposition(
    #[case] mode: DownloadWriteMode,
    #[case] expected_name: &str,
) {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.txt"), b"old contents").unwrap();
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/named"),
        DownloadTarget::Directory(dir.path().to_path_buf()),
    )
    .with_settings(download_settings(mode));
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    assert_eq!(states(&collected).last(), Some(&TransferState::Success));
    assert_eq!(
        std::fs::read(dir.path().join(expected_name)).unwrap(),
        b"hello"
    );

    context.shutdown().await;
}

#[tokio::test]
async fn test_do_nothing_fails_without_connecting() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keep.bin");
    std::fs::write(&path, b"keep me").unwrap();
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/bytes/10"),
        DownloadTarget::File(path.clone()),
    )
    .with_settings(TransferSettings {
        retry_limit: RetryLimit::Unlimited,
        ..download_settings(DownloadWriteMode::DoNothing)
    });
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    assert_eq!(
        states(&collected),
        vec![TransferState::Starting, TransferState::FailedFileReason]
    );
    assert_eq!(server.log().hits(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");

    context.shutdown().await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let server = TestServer::start().await;
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::new(context.next_id(), server.url(&format!("/bytes/{}", TOTAL)));
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    let progress: Vec<(u64, Option<u64>)> = collected
        .iter()
        .filter_map(|event| match event {
            TransferEvent::State {
                state: TransferState::Downloading,
                info,
                ..
            } => Some((info.download().transferred(), info.download().total())),
            _ => None,
        })
        .collect();

    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(progress.last(), Some(&(TOTAL as u64, Some(TOTAL as u64))));

    context.shutdown().await;
}

#[tokio::test]
async fn test_text_body_decoded_with_declared_charset() {
    let server = TestServer::start().await;
    let (context, mut events) = start_context(&test_config(2, 0));

    let mut request = TransferRequest::new(context.next_id(), server.url("/latin1"));
    request.settings.read_body_mode = ReadBodyMode::String;
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    let response = &responses(&collected)[0];
    assert_eq!(response.body, ResponseBody::Text("café".to_string()));
    assert_eq!(
        response.content_type.as_deref(),
        Some("text/plain; charset=iso-8859-1")
    );

    context.shutdown().await;
}

#[rstest]
#[case(RetryLimit::limited(1), 2)]
#[case(RetryLimit::limited(3), 4)]
#[tokio::test]
async fn test_retry_bound(#[case] limit: RetryLimit, #[case] expected_attempts: usize) {
    let server = TestServer::start().await;
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::new(context.next_id(), server.url("/status/503"))
        .with_settings(TransferSettings {
            retry_limit: limit,
            retry_delay: Duration::from_millis(10),
            declined_policy: DeclinedPolicy::Retry,
            ..TransferSettings::default()
        });
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;
    let states = states(&collected);

    assert_eq!(server.log().hits(), expected_attempts);
    assert_eq!(
        states.iter().filter(|s| **s == TransferState::Failed).count(),
        expected_attempts - 1
    );
    assert_eq!(states.last(), Some(&TransferState::FailedRetriesExceeded));
    match collected.last().unwrap() {
        TransferEvent::State { error, info, .. } => {
            assert_eq!(info.retries() as usize, expected_attempts - 1);
            assert_eq!(
                error,
                &Some(Error::RetriesExceeded {
                    attempts: expected_attempts as u32
                })
            );
        }
        other => panic!("unexpected final event {:?}", other),
    }

    context.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_download() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.bin");
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/slow/1048576"),
        DownloadTarget::File(path.clone()),
    )
    .with_settings(download_settings(DownloadWriteMode::Overwrite));
    let descriptor = context.submit(request).unwrap();
    wait_for_state(&mut events, descriptor.id(), |s| s == TransferState::Downloading).await;

    assert!(context.cancel(descriptor.id()));
    let collected = collect_until_finished(&mut events, descriptor.id()).await;

    assert_eq!(states(&collected).last(), Some(&TransferState::Cancelled));
    assert!(descriptor.is_cancelled());

    context.shutdown().await;
}

#[rstest]
#[case(DownloadWriteMode::Overwrite, true, vec![("f.bin", 1000)])]
#[case(DownloadWriteMode::CreateNew, true, vec![("f (1).bin", 1000), ("f.bin", 7)])]
#[case(DownloadWriteMode::CreateNew, false, vec![("f.bin", 1000)])]
#[case(DownloadWriteMode::DoNothing, false, vec![("f.bin", 1000)])]
#[tokio::test]
async fn test_retry_after_dropped_body_reuses_destination(
    #[case] mode: DownloadWriteMode,
    #[case] existing: bool,
    #[case] expected: Vec<(&str, usize)>,
) {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.bin");
    if existing {
        std::fs::write(&path, b"earlier").unwrap();
    }
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/flaky/1000"),
        DownloadTarget::File(path.clone()),
    )
    .with_settings(TransferSettings {
        retry_limit: RetryLimit::limited(2),
        retry_delay: Duration::from_millis(10),
        ..download_settings(mode)
    });
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;
    let states = states(&collected);

    assert_eq!(states.last(), Some(&TransferState::Success));
    assert_eq!(states.iter().filter(|s| **s == TransferState::Failed).count(), 1);
    assert_eq!(server.log().hits(), 2);

    let expected: Vec<(String, usize)> = expected
        .into_iter()
        .map(|(name, len)| (name.to_string(), len))
        .collect();
    assert_eq!(listing(dir.path()), expected);

    let written = match &responses(&collected)[0].body {
        ResponseBody::File(written) => written.clone(),
        other => panic!("unexpected body {:?}", other),
    };
    assert_eq!(std::fs::read(written).unwrap(), served_data(1000));

    context.shutdown().await;
}

#[rstest]
#[case(DownloadWriteMode::Overwrite)]
#[case(DownloadWriteMode::CreateNew)]
#[case(DownloadWriteMode::DoNothing)]
#[tokio::test]
async fn test_exhausted_retries_leave_no_partial(#[case] mode: DownloadWriteMode) {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::download(
        context.next_id(),
        server.url("/broken/1000"),
        DownloadTarget::Directory(dir.path().to_path_buf()),
    )
    .with_settings(TransferSettings {
        retry_limit: RetryLimit::limited(2),
        retry_delay: Duration::from_millis(10),
        ..download_settings(mode)
    });
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;

    assert_eq!(
        states(&collected).last(),
        Some(&TransferState::FailedRetriesExceeded)
    );
    assert_eq!(server.log().hits(), 3);
    assert!(listing(dir.path()).is_empty());

    context.shutdown().await;
}

#[rstest]
#[case(RetryLimit::None, 1, TransferState::Failed)]
#[case(RetryLimit::limited(1), 2, TransferState::FailedRetriesExceeded)]
#[tokio::test]
async fn test_silent_server_times_out(
    #[case] limit: RetryLimit,
    #[case] expected_hits: usize,
    #[case] expected_state: TransferState,
) {
    let server = TestServer::start().await;
    let (context, mut events) = start_context(&test_config(2, 0));

    let request = TransferRequest::new(context.next_id(), server.url("/silent")).with_settings(
        TransferSettings {
            timeouts: TimeoutConfig {
                connect_timeout: Duration::from_secs(5),
                read_timeout: Duration::from_millis(200),
            },
            retry_limit: limit,
            retry_delay: Duration::from_millis(10),
            ..TransferSettings::default()
        },
    );
    let id = context.submit(request).unwrap().id();
    let collected = collect_until_finished(&mut events, id).await;
    let states = states(&collected);

    assert_eq!(states.last(), Some(&expected_state));
    assert_eq!(server.log().hits(), expected_hits);
    let first_failure = collected.iter().find_map(|event| match event {
        TransferEvent::State {
            state: TransferState::Failed | TransferState::FailedRetriesExceeded,
            error,
            ..
        } => error.clone(),
        _ => None,
    });
    assert_eq!(first_failure, Some(Error::Timeout { millis: 200 }));

    context.shutdown().await;
}
