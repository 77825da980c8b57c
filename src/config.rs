use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DownloadError;

pub const DEFAULT_WORKERS: u32 = 20;
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_RETRIES: u32 = 2;

/// Tuning knobs for one download engine. Passed by value into every client
/// and fetcher; nothing here is process-global.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Number of segments, and therefore concurrent requests.
    pub workers: u32,
    /// Size of the chunks handed to the writer.
    pub chunk_size: usize,
    /// Maximum wait for the next piece of a response body.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// How many times a request that never got a response is re-sent.
    pub request_retries: u32,
    /// Cancel sibling segments once one of them fails.
    pub cancel_on_failure: bool,
    /// Size the target file to the full content length before fetching.
    pub preallocate: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_retries: DEFAULT_REQUEST_RETRIES,
            cancel_on_failure: false,
            preallocate: false,
            user_agent: concat!("rangedl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_request_retries(mut self, retries: u32) -> Self {
        self.request_retries = retries;
        self
    }

    pub fn with_cancel_on_failure(mut self, cancel: bool) -> Self {
        self.cancel_on_failure = cancel;
        self
    }

    pub fn with_preallocate(mut self, preallocate: bool) -> Self {
        self.preallocate = preallocate;
        self
    }

    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.workers == 0 {
            return Err(DownloadError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidConfig("chunk size must be greater than 0".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(DownloadError::InvalidConfig("read timeout must be greater than 0".into()));
        }
        Ok(())
    }
}
