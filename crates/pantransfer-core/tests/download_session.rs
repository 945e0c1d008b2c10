//! Resumable download sessions against an in-memory provider

mod common;

use std::path::Path;

use common::{pattern, MockPan, RangeReply, LINK};
use pantransfer_core::{
    error_log_path_for, temp_path_for, DownloadRequest, DownloadSession, EventSink, TransferError,
};
use pantransfer_types::{DownloadMode, TransferEvent, MIB};
use tokio::sync::broadcast;

fn request(destination: &Path, mode: DownloadMode) -> DownloadRequest {
    DownloadRequest {
        link: LINK.to_string(),
        destination: destination.to_path_buf(),
        overwrite: false,
        mode,
        error_log: false,
    }
}

async fn download(mock: &MockPan, request: DownloadRequest) -> Result<u64, TransferError> {
    let session = DownloadSession::prepare(mock, request, EventSink::none()).await?;
    Ok(session.run().await?.bytes)
}

/// Run a download and collect every event it published
async fn download_with_events(
    mock: &MockPan,
    request: DownloadRequest,
) -> (Result<u64, TransferError>, Vec<TransferEvent>) {
    let (tx, mut rx) = broadcast::channel(1024);
    let result = match DownloadSession::prepare(mock, request, EventSink::new(tx)).await {
        Ok(session) => session.run().await.map(|report| report.bytes),
        Err(e) => Err(e),
    };

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

fn last_total(events: &[TransferEvent]) -> Option<u64> {
    events
        .iter()
        .rev()
        .find_map(|event| match event {
            TransferEvent::DownloadProgress { total, .. } => Some(*total),
            _ => None,
        })
        .flatten()
}

#[tokio::test]
async fn simple_download_writes_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("movie.mkv");
    let content = pattern(300 * 1024 + 17);
    let mock = MockPan::serving(content.clone());

    let bytes = download(&mock, request(&dest, DownloadMode::Simple)).await.unwrap();

    assert_eq!(bytes, content.len() as u64);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
    assert!(!temp_path_for(&dest).exists());
    assert_eq!(mock.state().range_offsets, vec![0]);
}

#[tokio::test]
async fn resume_requests_remaining_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("five.bin");
    let content = pattern(5 * MIB as usize);
    let three = 3 * MIB as usize;
    tokio::fs::write(temp_path_for(&dest), &content[..three])
        .await
        .unwrap();
    let mock = MockPan::serving(content.clone());

    let (result, events) =
        download_with_events(&mock, request(&dest, DownloadMode::Breakpoint)).await;

    assert_eq!(mock.state().range_offsets, vec![3 * MIB]);
    assert_eq!(result.unwrap(), 5 * MIB);
    // Present bytes plus the declared remaining length
    assert_eq!(last_total(&events), Some(5 * MIB));
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
    assert!(!temp_path_for(&dest).exists());
}

#[tokio::test]
async fn retry_measures_temp_file_again() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("two.bin");
    let content = pattern(2 * MIB as usize);
    let mock = MockPan::serving(content.clone()).with(|s| {
        s.replies.push_back(RangeReply::CutAfter(1048576));
        s.replies.push_back(RangeReply::Serve);
    });
    let (tx, mut rx) = broadcast::channel(256);

    let session = DownloadSession::prepare(
        &mock,
        request(&dest, DownloadMode::BreakpointRetry { max_attempts: 3 }),
        EventSink::new(tx),
    )
    .await
    .unwrap();
    session.run().await.unwrap();

    assert_eq!(mock.state().range_offsets, vec![0, 1048576]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);

    let mut attempts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TransferEvent::AttemptStarted { attempt, offset, .. } = event {
            attempts.push((attempt, offset));
        }
    }
    assert_eq!(attempts, vec![(1, 0), (2, 1048576)]);
}

#[tokio::test]
async fn retry_resumes_after_mid_body_failure() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("reset.bin");
    let content = pattern(2 * MIB as usize);
    let mock = MockPan::serving(content.clone()).with(|s| {
        s.replies.push_back(RangeReply::FailAfter(1048576));
        s.replies.push_back(RangeReply::Serve);
    });

    let (result, events) = download_with_events(
        &mock,
        request(&dest, DownloadMode::BreakpointRetry { max_attempts: 3 }),
    )
    .await;

    assert_eq!(result.unwrap(), 2 * MIB);
    assert_eq!(mock.state().range_offsets, vec![0, 1048576]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
    assert!(!temp_path_for(&dest).exists());
    assert_eq!(last_total(&events), Some(2 * MIB));
}

#[tokio::test]
async fn breakpoint_keeps_bytes_before_stream_error() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("reset.bin");
    let content = pattern(300_000);
    let mock = MockPan::serving(content.clone())
        .with(|s| s.replies.push_back(RangeReply::FailAfter(131_072)));

    let err = download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Io(_)));
    assert!(err.is_retryable());
    assert_eq!(
        tokio::fs::read(temp_path_for(&dest)).await.unwrap(),
        &content[..131_072]
    );
    assert!(!dest.exists());
}

#[tokio::test]
async fn complete_temp_file_is_renamed_on_unsatisfiable_range() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("whole.bin");
    let content = pattern(70_000);
    tokio::fs::write(temp_path_for(&dest), &content).await.unwrap();
    let mock = MockPan::serving(content.clone());

    let (result, events) =
        download_with_events(&mock, request(&dest, DownloadMode::Breakpoint)).await;

    assert_eq!(result.unwrap(), 70_000);
    assert_eq!(mock.state().range_offsets, vec![70_000]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
    assert!(!temp_path_for(&dest).exists());
    assert_eq!(last_total(&events), Some(70_000));
}

#[tokio::test]
async fn unsatisfiable_range_from_zero_still_fails() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let mock = MockPan::serving(pattern(4096))
        .with(|s| s.replies.push_back(RangeReply::Status(416)));

    let err = download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::HttpStatus { status: 416, .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn overlong_body_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("long.bin");
    let content = pattern(10_000);
    let mock = MockPan::serving(content.clone())
        .with(|s| s.replies.push_back(RangeReply::Overrun(512)));

    let bytes = download(&mock, request(&dest, DownloadMode::Simple))
        .await
        .unwrap();

    assert_eq!(bytes, 10_512);
    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(written.len(), 10_512);
    assert_eq!(&written[..10_000], &content[..]);
}

#[tokio::test]
async fn retry_returns_last_error_when_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let mock = MockPan::serving(pattern(4096)).with(|s| {
        for _ in 0..3 {
            s.replies.push_back(RangeReply::Status(503));
        }
    });
    let mut req = request(&dest, DownloadMode::BreakpointRetry { max_attempts: 3 });
    req.error_log = true;

    let err = download(&mock, req).await.unwrap_err();

    assert!(matches!(err, TransferError::HttpStatus { status: 503, .. }));
    assert_eq!(mock.state().range_offsets.len(), 3);
    assert!(!dest.exists());

    let log = tokio::fs::read_to_string(error_log_path_for(&dest)).await.unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("attempt 1: server returned HTTP 503"));
    assert!(lines[2].contains("attempt 3: "));
}

#[tokio::test]
async fn non_retryable_errors_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let mock = MockPan::serving(pattern(4096))
        .with(|s| s.replies.push_back(RangeReply::Status(403)));

    let err = download(
        &mock,
        request(&dest, DownloadMode::BreakpointRetry { max_attempts: 5 }),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::HttpStatus { status: 403, .. }));
    assert_eq!(mock.state().range_offsets.len(), 1);
}

#[tokio::test]
async fn validation_errors_never_reach_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockPan::serving(pattern(4096));
    let mode = DownloadMode::BreakpointRetry { max_attempts: 5 };

    let missing_parent = dir.path().join("no-such-dir").join("a.bin");
    let err = download(&mock, request(&missing_parent, mode))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidDestination(_)));

    let mut bad_link = request(&dir.path().join("a.bin"), mode);
    bad_link.link = "not a link".to_string();
    let err = download(&mock, bad_link).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidLink(_)));

    assert!(mock.state().range_offsets.is_empty());
}

#[tokio::test]
async fn completed_download_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("done.bin");
    tokio::fs::write(&dest, b"finished earlier").await.unwrap();
    let modified = std::fs::metadata(&dest).unwrap().modified().unwrap();
    let mock = MockPan::serving(pattern(4096));

    let err = download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::AlreadyExists(_)));
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"finished earlier");
    assert_eq!(std::fs::metadata(&dest).unwrap().modified().unwrap(), modified);
    assert!(mock.state().range_offsets.is_empty());
}

#[tokio::test]
async fn overwrite_replaces_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("done.bin");
    tokio::fs::write(&dest, b"stale").await.unwrap();
    let content = pattern(10_000);
    let mock = MockPan::serving(content.clone());

    let mut req = request(&dest, DownloadMode::Simple);
    req.overwrite = true;
    download(&mock, req).await.unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
}

#[tokio::test]
async fn simple_mode_deletes_temp_file_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let mock = MockPan::serving(pattern(8192))
        .with(|s| s.replies.push_back(RangeReply::CutAfter(1000)));

    let err = download(&mock, request(&dest, DownloadMode::Simple))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::Incomplete { expected: 8192, received: 1000 }
    ));
    assert!(!temp_path_for(&dest).exists());
    assert!(!dest.exists());
}

#[tokio::test]
async fn breakpoint_mode_keeps_temp_file_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let content = pattern(8192);
    let mock = MockPan::serving(content.clone())
        .with(|s| s.replies.push_back(RangeReply::CutAfter(1000)));

    let err = download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        tokio::fs::read(temp_path_for(&dest)).await.unwrap(),
        &content[..1000]
    );

    // A later run picks up where the first one stopped
    download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap();
    assert_eq!(mock.state().range_offsets, vec![0, 1000]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
}

#[tokio::test]
async fn ignored_range_restarts_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    tokio::fs::write(temp_path_for(&dest), vec![0xAA; 4096])
        .await
        .unwrap();
    let content = pattern(10_000);
    let mock = MockPan::serving(content.clone()).with(|s| s.ignore_range = true);

    download(&mock, request(&dest, DownloadMode::Breakpoint))
        .await
        .unwrap();

    assert_eq!(mock.state().range_offsets, vec![4096]);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
}

/// Sessions on one destination share a temporary file. Running them at the
/// same time interleaves writes, so callers serialize them.
#[tokio::test]
async fn same_destination_shares_temp_path() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("shared.bin");
    let mock = MockPan::serving(pattern(4096));

    let first = DownloadSession::prepare(
        &mock,
        request(&dest, DownloadMode::Breakpoint),
        EventSink::none(),
    )
    .await
    .unwrap();
    let second = DownloadSession::prepare(
        &mock,
        request(&dest, DownloadMode::Breakpoint),
        EventSink::none(),
    )
    .await
    .unwrap();

    assert_eq!(first.temp_path(), second.temp_path());
    assert_eq!(first.temp_path(), temp_path_for(&dest).as_path());
}
