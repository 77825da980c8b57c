use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive byte span `[start, end]` of the remote file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "empty byte range {}-{}", start, end);
        Self { start, end }
    }

    /// Number of bytes covered, always at least one.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Split `content_length` bytes into contiguous ranges for `workers` segments.
///
/// Every range spans `content_length / workers + 1` bytes except the last,
/// which absorbs the remainder. The result is sorted, gap-free and never
/// longer than `min(workers, content_length)`. Both inputs must be at least 1.
pub fn partition(content_length: u64, workers: u32) -> Vec<ByteRange> {
    debug_assert!(content_length >= 1 && workers >= 1);
    let workers = u64::from(workers.max(1));
    let base = content_length / workers;

    let mut ranges = Vec::with_capacity(workers.min(content_length) as usize);
    let mut start = 0u64;
    while start + base < content_length {
        ranges.push(ByteRange::new(start, start + base));
        start += base + 1;
    }
    // When the last full-size range ends exactly on the final byte there is
    // no remainder left to emit.
    if start < content_length {
        ranges.push(ByteRange::new(start, content_length - 1));
    }
    ranges
}
