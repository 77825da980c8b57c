use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::progress::{ProgressAggregator, SegmentTracker};
use crate::source::RangeSource;
use crate::writer::PositionedWriter;

/// Regroups network frames into chunks of exactly `size` bytes.
#[derive(Debug)]
struct Chunker {
    size: usize,
    buf: BytesMut,
}

impl Chunker {
    fn new(size: usize) -> Self {
        Self {
            size,
            buf: BytesMut::with_capacity(size),
        }
    }

    fn push(&mut self, frame: &[u8]) {
        self.buf.extend_from_slice(frame);
    }

    fn next_full(&mut self) -> Option<Bytes> {
        (self.buf.len() >= self.size).then(|| self.buf.split_to(self.size).freeze())
    }

    fn rest(&mut self) -> Option<Bytes> {
        (!self.buf.is_empty()).then(|| self.buf.split().freeze())
    }
}

/// Downloads one segment into the shared writer.
///
/// One fetcher is built per job and cloned into every segment task; clones
/// share the source, writer, progress and cancellation token.
pub struct SegmentFetcher<S> {
    source: Arc<S>,
    writer: Arc<PositionedWriter>,
    progress: Arc<ProgressAggregator>,
    chunk_size: usize,
    read_timeout: Duration,
    cancel: CancellationToken,
    cancel_on_failure: bool,
}

impl<S> Clone for SegmentFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            writer: self.writer.clone(),
            progress: self.progress.clone(),
            chunk_size: self.chunk_size,
            read_timeout: self.read_timeout,
            cancel: self.cancel.clone(),
            cancel_on_failure: self.cancel_on_failure,
        }
    }
}

impl<S: RangeSource> SegmentFetcher<S> {
    pub fn new(
        source: Arc<S>,
        writer: Arc<PositionedWriter>,
        progress: Arc<ProgressAggregator>,
        chunk_size: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            source,
            writer,
            progress,
            chunk_size,
            read_timeout,
            cancel: CancellationToken::new(),
            cancel_on_failure: false,
        }
    }

    /// Cancel every clone of this fetcher as soon as one of them fails.
    pub fn with_cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch the segment tracked by `tracker` from `url`.
    ///
    /// Any error leaves the tracker `Failed`; nothing is retried.
    pub async fn fetch(&self, url: &str, tracker: &SegmentTracker) -> Result<(), FetchError> {
        let range = tracker.range();
        tracing::debug!(segment = tracker.id(), start = range.start, end = range.end, "segment started");

        match self.transfer(url, tracker).await {
            Ok(()) => {
                tracing::debug!(segment = tracker.id(), bytes = tracker.transferred(), "segment finished");
                Ok(())
            }
            Err(e) => {
                tracker.fail();
                tracing::warn!(
                    segment = tracker.id(),
                    bytes = tracker.transferred(),
                    error = %e,
                    "segment failed"
                );
                if self.cancel_on_failure && !matches!(e, FetchError::Cancelled) {
                    self.cancel.cancel();
                }
                Err(e)
            }
        }
    }

    async fn transfer(&self, url: &str, tracker: &SegmentTracker) -> Result<(), FetchError> {
        let range = tracker.range();
        let content_length = self.progress.content_length();

        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            opened = tokio::time::timeout(
                self.read_timeout,
                self.source.fetch_range(url, range, content_length),
            ) => opened.map_err(|_| FetchError::Timeout(self.read_timeout))??,
        };

        // Low edge of the shrinking window.
        let mut cursor = range.start;
        let mut chunker = Chunker::new(self.chunk_size);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                next = tokio::time::timeout(self.read_timeout, stream.next()) => {
                    next.map_err(|_| FetchError::Timeout(self.read_timeout))?
                }
            };

            match frame {
                Some(frame) => {
                    chunker.push(&frame?);
                    while let Some(chunk) = chunker.next_full() {
                        if self.commit(tracker, &mut cursor, chunk).await? {
                            return Ok(());
                        }
                    }
                }
                None => {
                    if let Some(chunk) = chunker.rest() {
                        if self.commit(tracker, &mut cursor, chunk).await? {
                            return Ok(());
                        }
                    }
                    return Err(FetchError::UnexpectedEof {
                        expected: range.len(),
                        received: tracker.transferred(),
                    });
                }
            }
        }
    }

    /// Write one chunk at the window's low edge and advance it. Returns true
    /// once the window is exhausted.
    async fn commit(
        &self,
        tracker: &SegmentTracker,
        cursor: &mut u64,
        chunk: Bytes,
    ) -> Result<bool, FetchError> {
        let end = tracker.range().end;
        let remaining = end + 1 - *cursor;
        let take = remaining.min(chunk.len() as u64);
        if take < chunk.len() as u64 {
            tracing::debug!(
                segment = tracker.id(),
                discarded = chunk.len() as u64 - take,
                "server sent bytes past the end of the range"
            );
        }

        self.writer.write_at(*cursor, &chunk[..take as usize]).await?;
        *cursor += take;
        tracker.advance(take);
        self.progress.report(tracker.id(), take);

        if *cursor > end {
            tracker.finish();
            return Ok(true);
        }
        Ok(false)
    }
}
