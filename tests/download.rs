use bytes::Bytes;
use futures::{stream, StreamExt};
use rangedl::{
    BodyStream, ByteRange, DownloadError, Downloader, FetchConfig, FetchError, JobPhase,
    MetadataError, Outcome, RangeSource, SegmentStatus,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory range server with failure injection keyed by segment start.
#[derive(Default)]
struct MemorySource {
    data: Vec<u8>,
    missing_length: bool,
    /// Segment start -> bytes delivered before the connection breaks.
    failures: HashMap<u64, usize>,
    /// Healthy segments send one frame and then stall.
    stall_healthy: bool,
    /// Ignore the range end and send everything up to EOF.
    overshoot: bool,
    frame: usize,
    frame_delay: Option<Duration>,
    requests: Mutex<Vec<String>>,
}

impl MemorySource {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            frame: 7,
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl RangeSource for MemorySource {
    async fn content_length(&self, url: &str) -> Result<u64, MetadataError> {
        self.requests.lock().unwrap().push(format!("HEAD {}", url));
        if self.missing_length {
            return Err(MetadataError::MissingLength { url: url.to_string() });
        }
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(
        &self,
        url: &str,
        range: ByteRange,
        _content_length: u64,
    ) -> Result<BodyStream, FetchError> {
        self.requests.lock().unwrap().push(format!("GET {} {}", url, range.header_value()));

        let end = if self.overshoot {
            self.data.len() - 1
        } else {
            range.end as usize
        };
        let mut body = self.data[range.start as usize..=end].to_vec();
        let failure = self.failures.get(&range.start).copied();
        if let Some(limit) = failure {
            body.truncate(limit);
        }

        let mut frames: Vec<Result<Bytes, FetchError>> = body
            .chunks(self.frame)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let stall = self.stall_healthy && failure.is_none();
        if stall {
            frames.truncate(1);
        }
        if failure.is_some() {
            frames.push(Err(FetchError::Network("connection reset by peer".into())));
        }

        let delay = self.frame_delay;
        let frames = stream::iter(frames).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        let body: BodyStream = if stall {
            Box::pin(frames.chain(stream::pending()))
        } else {
            Box::pin(frames)
        };
        Ok(body)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn config(workers: u32) -> FetchConfig {
    FetchConfig::default()
        .with_workers(workers)
        .with_chunk_size(10)
        .with_read_timeout(Duration::from_secs(5))
}

fn target() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");
    (dir, path)
}

#[tokio::test]
async fn test_three_segments_over_1000_bytes() {
    let data = pattern(1000);
    let downloader = Downloader::with_source(MemorySource::new(data.clone()), config(3));
    let monitor = downloader.monitor();
    let (_dir, path) = target();

    let result = downloader.download("http://test/file.bin", &path).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.snapshot.content_length, 1000);
    assert_eq!(result.snapshot.total_transferred, 1000);
    let ranges: Vec<_> = result.snapshot.segments.iter().map(|s| s.range).collect();
    assert_eq!(
        ranges,
        vec![
            ByteRange::new(0, 333),
            ByteRange::new(334, 667),
            ByteRange::new(668, 999),
        ]
    );
    assert!(result
        .snapshot
        .segments
        .iter()
        .all(|s| s.status == SegmentStatus::Finished && s.transferred == s.range.len()));
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(monitor.phase(), JobPhase::Completed);
    assert_eq!(result.snapshot.started_at, result.started_at);
}

#[tokio::test]
async fn test_one_broken_segment_does_not_affect_others() {
    let data = pattern(1000);
    let mut source = MemorySource::new(data.clone());
    source.failures.insert(334, 100);
    let downloader = Downloader::with_source(source, config(3));
    let (_dir, path) = target();

    let result = downloader.download("http://test/file.bin", &path).await.unwrap();

    assert_eq!(result.outcome, Outcome::PartialFailure);
    let statuses: Vec<_> = result.snapshot.segments.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![SegmentStatus::Finished, SegmentStatus::Failed, SegmentStatus::Finished]
    );
    assert_eq!(result.snapshot.segments[1].transferred, 100);
    assert_eq!(result.snapshot.total_transferred, 334 + 100 + 332);
    assert_eq!(result.snapshot.missing_ranges(), vec![ByteRange::new(434, 667)]);
    assert_eq!(downloader.monitor().phase(), JobPhase::PartiallyFailed);

    // The partial file is kept and every byte outside the hole is correct.
    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), 1000);
    assert_eq!(&written[..434], &data[..434]);
    assert_eq!(&written[668..], &data[668..]);
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let mut source = MemorySource::new(pattern(1000));
    source.failures.insert(0, 20);
    source.stall_healthy = true;
    source.frame_delay = Some(Duration::from_millis(20));
    let config = config(4)
        .with_read_timeout(Duration::from_secs(30))
        .with_cancel_on_failure(true);
    let downloader = Downloader::with_source(source, config);
    let (_dir, path) = target();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        downloader.download("http://test/file.bin", &path),
    )
    .await
    .expect("stalled segments were not cancelled")
    .unwrap();

    assert_eq!(result.outcome, Outcome::PartialFailure);
    assert!(result
        .snapshot
        .segments
        .iter()
        .all(|s| s.status == SegmentStatus::Failed));
}

#[tokio::test]
async fn test_missing_content_length_is_fatal() {
    let mut source = MemorySource::new(pattern(10));
    source.missing_length = true;
    let downloader = Downloader::with_source(source, config(3));
    let (_dir, path) = target();

    let err = downloader.download("http://test/file.bin", &path).await.unwrap_err();

    assert!(matches!(
        err,
        DownloadError::Metadata(MetadataError::MissingLength { .. })
    ));
    assert!(!path.exists());
    assert!(downloader.monitor().snapshot().is_none());
    assert_eq!(downloader.monitor().phase(), JobPhase::Aborted);
}

#[tokio::test]
async fn test_url_transform_applies_to_segments_only() {
    let source = Arc::new(MemorySource::new(pattern(100)));
    let downloader = Downloader::with_source(SharedSource(source.clone()), config(2));
    let (_dir, path) = target();

    let result = downloader
        .start("http://test/original", &path, |url: &str| format!("{}?mirror=1", url))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    let mut requests = source.requests();
    requests.sort();
    assert_eq!(
        requests,
        vec![
            "GET http://test/original?mirror=1 bytes=0-50".to_string(),
            "GET http://test/original?mirror=1 bytes=51-99".to_string(),
            "HEAD http://test/original".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unwritable_target_is_fatal() {
    let downloader = Downloader::with_source(MemorySource::new(pattern(100)), config(2));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.bin");

    let err = downloader.download("http://test/file.bin", &path).await.unwrap_err();

    match err {
        DownloadError::Io { path: failed, .. } => assert_eq!(failed, path),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(downloader.monitor().phase(), JobPhase::Aborted);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_disk_full_fails_segments_not_the_job() {
    let downloader = Downloader::with_source(MemorySource::new(pattern(100)), config(3));

    let result = downloader
        .download("http://test/file.bin", std::path::Path::new("/dev/full"))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::PartialFailure);
    assert_eq!(result.snapshot.count(SegmentStatus::Failed), 3);
    assert_eq!(result.snapshot.total_transferred, 0);
    assert_eq!(downloader.monitor().phase(), JobPhase::PartiallyFailed);
}

#[tokio::test]
async fn test_zero_length_file() {
    let downloader = Downloader::with_source(MemorySource::new(vec![]), config(4));
    let (_dir, path) = target();
    std::fs::write(&path, b"stale").unwrap();

    let result = downloader.download("http://test/empty", &path).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert!(result.snapshot.segments.is_empty());
    assert_eq!(result.snapshot.started_at, result.started_at);
    assert_eq!(std::fs::read(&path).unwrap(), b"");
}

#[tokio::test]
async fn test_more_workers_than_bytes() {
    let data = pattern(10);
    let downloader = Downloader::with_source(MemorySource::new(data.clone()), config(20));
    let (_dir, path) = target();

    let result = downloader.download("http://test/tiny", &path).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert!(!result.snapshot.segments.is_empty());
    assert!(result.snapshot.segments.len() <= 10);
    assert_eq!(result.snapshot.total_transferred, 10);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_server_ignoring_range_end_cannot_clobber_neighbours() {
    let data = pattern(500);
    let mut source = MemorySource::new(data.clone());
    source.overshoot = true;
    let downloader = Downloader::with_source(source, config(5));
    let (_dir, path) = target();

    let result = downloader.download("http://test/file.bin", &path).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.snapshot.total_transferred, 500);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_progress_is_monotonic_while_running() {
    let mut source = MemorySource::new(pattern(2000));
    source.frame_delay = Some(Duration::from_millis(2));
    let downloader = Downloader::with_source(source, config(4));
    let monitor = downloader.monitor();
    let (_dir, path) = target();

    let poller = tokio::spawn(async move {
        let mut seen = vec![];
        loop {
            if let Some(snapshot) = monitor.snapshot() {
                let done = snapshot
                    .segments
                    .iter()
                    .all(|s| s.status != SegmentStatus::Running);
                seen.push(snapshot);
                if done {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        seen
    });

    let result = downloader.download("http://test/file.bin", &path).await.unwrap();
    let snapshots = poller.await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        assert!(pair[1].total_transferred >= pair[0].total_transferred);
        for (before, after) in pair[0].segments.iter().zip(&pair[1].segments) {
            assert!(after.transferred >= before.transferred);
            assert!(after.transferred <= after.range.len());
        }
    }
    for snapshot in &snapshots {
        assert!(snapshot.total_transferred <= snapshot.content_length);
    }
}

/// Lets a test keep a handle on the source after handing it to the downloader.
struct SharedSource(Arc<MemorySource>);

impl RangeSource for SharedSource {
    async fn content_length(&self, url: &str) -> Result<u64, MetadataError> {
        self.0.content_length(url).await
    }

    async fn fetch_range(
        &self,
        url: &str,
        range: ByteRange,
        content_length: u64,
    ) -> Result<BodyStream, FetchError> {
        self.0.fetch_range(url, range, content_length).await
    }
}
