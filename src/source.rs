use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;

use crate::config::FetchConfig;
use crate::error::{FetchError, MetadataError};
use crate::partition::ByteRange;

/// Response body of a ranged request.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Where segment bytes come from.
///
/// [`HttpSource`] is the production implementation; tests plug in an
/// in-memory source to inject failures.
pub trait RangeSource: Send + Sync + 'static {
    /// Total size of the resource, from the `Content-Length` of a HEAD.
    fn content_length(&self, url: &str) -> impl Future<Output = Result<u64, MetadataError>> + Send;

    /// Open a streaming GET for `range` of a resource of `content_length` bytes.
    fn fetch_range(
        &self,
        url: &str,
        range: ByteRange,
        content_length: u64,
    ) -> impl Future<Output = Result<BodyStream, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    retries: u32,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            retries: config.request_retries,
        }
    }

    /// Follow redirects once and return the final URL.
    pub async fn resolve(&self, url: &str) -> Result<String, MetadataError> {
        let response = self
            .send(|| self.client.head(url))
            .await
            .map_err(|e| MetadataError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.url().to_string())
    }

    // Only requests that never produced a response are re-sent; a body that
    // breaks mid-stream is the fetcher's problem.
    async fn send<F>(&self, request: F) -> reqwest::Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match request().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retries && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "retrying request");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl RangeSource for HttpSource {
    async fn content_length(&self, url: &str) -> Result<u64, MetadataError> {
        let response = self
            .send(|| self.client.head(url))
            .await
            .map_err(|e| MetadataError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(MetadataError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        parse_content_length(url, response.headers().get(header::CONTENT_LENGTH))
    }

    async fn fetch_range(
        &self,
        url: &str,
        range: ByteRange,
        content_length: u64,
    ) -> Result<BodyStream, FetchError> {
        let response = self
            .send(|| self.client.get(url).header(header::RANGE, range.header_value()))
            .await?;

        let whole_file = range.start == 0 && range.end + 1 == content_length;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if whole_file => {}
            status => return Err(FetchError::Status(status.as_u16())),
        }

        let stream = response.bytes_stream().map(|item| item.map_err(FetchError::from));
        Ok(Box::pin(stream))
    }
}

fn parse_content_length(
    url: &str,
    value: Option<&header::HeaderValue>,
) -> Result<u64, MetadataError> {
    let value = value.ok_or_else(|| MetadataError::MissingLength {
        url: url.to_string(),
    })?;
    let text = value.to_str().unwrap_or_default().trim();
    text.parse::<u64>().map_err(|_| MetadataError::InvalidLength {
        url: url.to_string(),
        value: text.to_string(),
    })
}
