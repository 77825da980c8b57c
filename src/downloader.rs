use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::FetchConfig;
use crate::error::{DownloadError, Result};
use crate::fetcher::SegmentFetcher;
use crate::partition::partition;
use crate::progress::{JobPhase, ProgressAggregator, ProgressMonitor, ProgressSnapshot};
use crate::source::{HttpSource, RangeSource};
use crate::writer::PositionedWriter;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The target exists but the ranges owned by failed segments are invalid.
    PartialFailure,
}

#[derive(Serialize, Debug, Clone)]
pub struct DownloadResult {
    pub url: String,
    pub target: PathBuf,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub outcome: Outcome,
    /// Final state of every segment.
    pub snapshot: ProgressSnapshot,
}

/// Splits one remote file into ranges and fetches them concurrently into a
/// single local file.
pub struct Downloader<S = HttpSource> {
    source: Arc<S>,
    config: FetchConfig,
    monitor: ProgressMonitor,
}

impl Downloader<HttpSource> {
    pub fn new(config: FetchConfig) -> Self {
        let source = HttpSource::new(&config);
        Self::with_source(source, config)
    }
}

impl<S: RangeSource> Downloader<S> {
    pub fn with_source(source: S, config: FetchConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            monitor: ProgressMonitor::new(),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Handle for polling progress while `start` runs.
    pub fn monitor(&self) -> ProgressMonitor {
        self.monitor.clone()
    }

    /// Download `url` to `target` with requests going to the URL unchanged.
    pub async fn download(&self, url: &str, target: &Path) -> Result<DownloadResult> {
        self.start(url, target, |u: &str| u.to_string()).await
    }

    /// Download `url` to `target`.
    ///
    /// The probe goes to `url`; every segment requests `url_transform(url)`.
    /// Segment failures never abort the job: they show up as
    /// [`Outcome::PartialFailure`] and the partially written file is left in
    /// place. Errors are returned only when nothing could be started.
    pub async fn start<F>(&self, url: &str, target: &Path, url_transform: F) -> Result<DownloadResult>
    where
        F: Fn(&str) -> String,
    {
        self.monitor.reset();
        let result = self.run(url, target, url_transform).await;
        if let Err(e) = &result {
            self.monitor.set_phase(JobPhase::Aborted);
            tracing::warn!(url, error = %e, "download aborted");
        }
        result
    }

    async fn run<F>(&self, url: &str, target: &Path, url_transform: F) -> Result<DownloadResult>
    where
        F: Fn(&str) -> String,
    {
        self.config.validate()?;
        let started = Instant::now();
        let started_at = Local::now();

        tracing::info!(url, "probing content length");
        let content_length = self.source.content_length(url).await?;
        tracing::info!(url, content_length, "content length established");

        if content_length == 0 {
            return self.finish_empty(url, target, started, started_at).await;
        }

        let ranges = partition(content_length, self.config.workers);
        let progress =
            Arc::new(ProgressAggregator::new(content_length, &ranges).with_started_at(started_at));
        self.monitor.attach(progress.clone());
        tracing::info!(segments = ranges.len(), workers = self.config.workers, "partitioned");

        let preallocate = self.config.preallocate.then_some(content_length);
        let writer = PositionedWriter::create(target, preallocate)
            .await
            .map_err(|source| DownloadError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        let writer = Arc::new(writer);

        let fetcher = SegmentFetcher::new(
            self.source.clone(),
            writer.clone(),
            progress.clone(),
            self.config.chunk_size,
            self.config.read_timeout,
        )
        .with_cancel_on_failure(self.config.cancel_on_failure);

        self.monitor.set_phase(JobPhase::Running);
        let mut handles = vec![];
        for tracker in progress.segments() {
            let fetcher = fetcher.clone();
            let tracker = tracker.clone();
            let segment_url = url_transform(url);
            let handle = tokio::spawn(async move { fetcher.fetch(&segment_url, &tracker).await });
            handles.push(handle);
        }

        // Unconditional join; failures are already recorded on the trackers.
        for (tracker, handle) in progress.segments().iter().zip(handles) {
            if let Err(e) = handle.await {
                tracker.fail();
                tracing::warn!(segment = tracker.id(), error = %e, "segment task aborted");
            }
        }

        if let Err(e) = writer.finish().await {
            tracing::warn!(path = ?target, error = %e, "failed to sync output file");
        }

        let snapshot = progress.snapshot();
        let outcome = if snapshot.is_complete() {
            self.monitor.set_phase(JobPhase::Completed);
            Outcome::Success
        } else {
            self.monitor.set_phase(JobPhase::PartiallyFailed);
            Outcome::PartialFailure
        };
        let elapsed = started.elapsed();
        tracing::info!(
            ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            bytes = snapshot.total_transferred,
            "download finished"
        );

        Ok(DownloadResult {
            url: url.to_string(),
            target: target.to_path_buf(),
            started_at,
            elapsed,
            outcome,
            snapshot,
        })
    }

    // A zero-length resource has nothing to partition: create the empty file
    // and report success.
    async fn finish_empty(
        &self,
        url: &str,
        target: &Path,
        started: Instant,
        started_at: DateTime<Local>,
    ) -> Result<DownloadResult> {
        let progress = Arc::new(ProgressAggregator::new(0, &[]).with_started_at(started_at));
        self.monitor.attach(progress.clone());

        let writer = PositionedWriter::create(target, None)
            .await
            .map_err(|source| DownloadError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        if let Err(e) = writer.finish().await {
            tracing::warn!(path = ?target, error = %e, "failed to sync output file");
        }
        self.monitor.set_phase(JobPhase::Completed);

        Ok(DownloadResult {
            url: url.to_string(),
            target: target.to_path_buf(),
            started_at,
            elapsed: started.elapsed(),
            outcome: Outcome::Success,
            snapshot: progress.snapshot(),
        })
    }
}
