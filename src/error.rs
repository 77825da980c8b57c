//! Error types for rangedl.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The metadata probe could not establish the file size. Aborts the job
/// before any segment starts.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HEAD {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("HEAD {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("HEAD {url} carries no Content-Length")]
    MissingLength { url: String },

    #[error("HEAD {url} carries a non-numeric Content-Length: {value:?}")]
    InvalidLength { url: String, value: String },
}

/// Failure of a single segment. Never crosses the segment boundary; it ends
/// up as a `Failed` status on that segment's tracker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0} for ranged request")]
    Status(u16),

    #[error("stream closed early: expected {expected} bytes, received {received}")]
    UnexpectedEof { expected: u64, received: u64 },

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled after a sibling segment failed")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Job-fatal errors: nothing was transferred when one of these is returned.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("cannot open {path:?} for writing: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
