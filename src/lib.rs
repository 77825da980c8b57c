//! Parallel HTTP range downloader.
//!
//! A file is split into contiguous byte ranges which are fetched
//! concurrently with `Range` requests and written into one shared file at
//! their offsets. See [`Downloader`] for the entry point.

pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod partition;
pub mod progress;
pub mod source;
pub mod utils;
pub mod writer;

pub use config::FetchConfig;
pub use downloader::{DownloadResult, Downloader, Outcome};
pub use error::{DownloadError, FetchError, MetadataError};
pub use fetcher::SegmentFetcher;
pub use partition::{partition, ByteRange};
pub use progress::{
    JobPhase, ProgressAggregator, ProgressMonitor, ProgressSnapshot, SegmentSnapshot, SegmentStatus,
    SegmentTracker,
};
pub use source::{BodyStream, HttpSource, RangeSource};
pub use writer::PositionedWriter;
