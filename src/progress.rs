use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::partition::ByteRange;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Running,
    Finished,
    Failed,
}

impl SegmentStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SegmentStatus::Finished,
            2 => SegmentStatus::Failed,
            _ => SegmentStatus::Running,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SegmentStatus::Running => 0,
            SegmentStatus::Finished => 1,
            SegmentStatus::Failed => 2,
        }
    }
}

/// Live state of one segment.
///
/// Only the fetcher that owns the segment mutates it; everyone else reads
/// through [`SegmentTracker::snapshot`].
#[derive(Debug)]
pub struct SegmentTracker {
    id: usize,
    range: ByteRange,
    transferred: AtomicU64,
    status: AtomicU8,
}

impl SegmentTracker {
    pub fn new(id: usize, range: ByteRange) -> Self {
        Self {
            id,
            range,
            transferred: AtomicU64::new(0),
            status: AtomicU8::new(SegmentStatus::Running.as_u8()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The range originally assigned to this segment.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SegmentStatus {
        SegmentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Record `n` more bytes written and return the new running count.
    pub(crate) fn advance(&self, n: u64) -> u64 {
        let total = self.transferred.fetch_add(n, Ordering::AcqRel) + n;
        debug_assert!(total <= self.range.len(), "segment {} over-counted", self.id);
        total
    }

    pub(crate) fn finish(&self) {
        self.transition(SegmentStatus::Finished);
    }

    pub(crate) fn fail(&self) {
        self.transition(SegmentStatus::Failed);
    }

    // Terminal states are sticky.
    fn transition(&self, to: SegmentStatus) {
        let _ = self.status.compare_exchange(
            SegmentStatus::Running.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            id: self.id,
            range: self.range,
            transferred: self.transferred(),
            status: self.status(),
        }
    }
}

/// Point-in-time copy of one segment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SegmentSnapshot {
    pub id: usize,
    pub range: ByteRange,
    pub transferred: u64,
    pub status: SegmentStatus,
}

impl SegmentSnapshot {
    /// The part of the range that has not been written yet.
    pub fn remaining(&self) -> Option<ByteRange> {
        let next = self.range.start + self.transferred;
        (next <= self.range.end).then(|| ByteRange::new(next, self.range.end))
    }
}

/// Point-in-time copy of a whole job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub content_length: u64,
    pub total_transferred: u64,
    pub started_at: DateTime<Local>,
    pub segments: Vec<SegmentSnapshot>,
}

impl ProgressSnapshot {
    pub fn count(&self, status: SegmentStatus) -> usize {
        self.segments.iter().filter(|s| s.status == status).count()
    }

    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(|s| s.status == SegmentStatus::Finished)
    }

    /// Byte ranges of failed segments that were never written.
    pub fn missing_ranges(&self) -> Vec<ByteRange> {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Failed)
            .filter_map(SegmentSnapshot::remaining)
            .collect()
    }
}

/// Shared view over every segment of one job plus the whole-file counter.
#[derive(Debug)]
pub struct ProgressAggregator {
    content_length: u64,
    started_at: DateTime<Local>,
    segments: Vec<Arc<SegmentTracker>>,
    total: AtomicU64,
}

impl ProgressAggregator {
    pub fn new(content_length: u64, ranges: &[ByteRange]) -> Self {
        let segments = ranges
            .iter()
            .enumerate()
            .map(|(id, range)| Arc::new(SegmentTracker::new(id, *range)))
            .collect();
        Self {
            content_length,
            started_at: Local::now(),
            segments,
            total: AtomicU64::new(0),
        }
    }

    /// Use the job's own start time instead of the construction time.
    pub fn with_started_at(mut self, started_at: DateTime<Local>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn segments(&self) -> &[Arc<SegmentTracker>] {
        &self.segments
    }

    /// Count `bytes` freshly written by `segment` towards the file total.
    pub fn report(&self, segment: usize, bytes: u64) {
        let total = self.total.fetch_add(bytes, Ordering::AcqRel) + bytes;
        tracing::trace!(segment, bytes, total, "progress");
    }

    pub fn total_transferred(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            content_length: self.content_length,
            total_transferred: self.total_transferred(),
            started_at: self.started_at,
            segments: self.segments.iter().map(|s| s.snapshot()).collect(),
        }
    }
}

/// Lifecycle of one `start()` call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Probing,
    Partitioned,
    Running,
    Completed,
    PartiallyFailed,
    /// A job-fatal error ended the job before any segment ran.
    Aborted,
}

#[derive(Debug, Default)]
struct MonitorState {
    phase: JobPhase,
    progress: Option<Arc<ProgressAggregator>>,
}

/// Cloneable pull handle for presentation layers.
///
/// Obtained from the downloader before `start()` and polled at whatever
/// cadence the caller likes; the engine never pushes output itself.
#[derive(Debug, Clone, Default)]
pub struct ProgressMonitor {
    inner: Arc<RwLock<MonitorState>>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> JobPhase {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).phase
    }

    /// `None` until the current job has been partitioned.
    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state.progress.as_ref().map(|p| p.snapshot())
    }

    pub(crate) fn set_phase(&self, phase: JobPhase) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(from = ?state.phase, to = ?phase, "job phase");
        state.phase = phase;
    }

    pub(crate) fn reset(&self) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.phase = JobPhase::Probing;
        state.progress = None;
    }

    pub(crate) fn attach(&self, progress: Arc<ProgressAggregator>) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.progress = Some(progress);
        state.phase = JobPhase::Partitioned;
    }
}
