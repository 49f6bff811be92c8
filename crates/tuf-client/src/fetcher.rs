//! Bounded byte retrieval for metadata and target files.
//!
//! Every fetch carries an upper bound on the number of bytes and on the time
//! it may take, which is how the client defends against endless-data and
//! slow-retrieval attacks. The [`Fetcher`] trait is the seam tests use to
//! script repository responses without a network.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

/// Errors produced while retrieving bytes.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// DNS, TLS, socket, or malformed URL failures.
    #[error("request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },
    /// The request did not complete within the allotted time.
    #[error("request to '{url}' timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    /// The server answered with a non-success status.
    #[error("'{url}' returned HTTP status {code}")]
    HttpStatus { url: String, code: u16 },
    /// The body grew past the caller's bound.
    #[error("'{url}' exceeded the maximum length of {max_length} bytes")]
    LengthExceeded { url: String, max_length: u64 },
}

impl FetchError {
    /// HTTP status code, when the server answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` when the resource does not exist (HTTP 403 or 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(403 | 404))
    }
}

/// Source of raw bytes for metadata and targets.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Retrieves `url`, failing once more than `max_length` bytes arrive or
    /// `timeout` elapses. On failure no partial data is returned.
    async fn fetch(&self, url: &str, max_length: u64, timeout: Duration)
        -> Result<Vec<u8>, FetchError>;
}

/// [`Fetcher`] backed by a reusable `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    /// Underlying HTTP client (shared across requests).
    http: Client,
}

impl HttpFetcher {
    /// Builds a fetcher announcing `user_agent` on every request.
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client, e.g. one with custom TLS roots.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn download(&self, url: Url, max_length: u64) -> Result<Vec<u8>, FetchError> {
        let url_text = url.to_string();
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: url_text.clone(),
            reason: err.to_string(),
        };
        let mut response = self.http.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url_text.clone(),
                code: status.as_u16(),
            });
        }
        let too_long = || FetchError::LengthExceeded {
            url: url_text.clone(),
            max_length,
        };
        if let Some(declared) = response.content_length() {
            if declared > max_length {
                debug!(url = %url_text, declared, max_length, "tuf: declared length exceeds bound");
                return Err(too_long());
            }
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if body.len() as u64 + chunk.len() as u64 > max_length {
                return Err(too_long());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        max_length: u64,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|err| FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        debug!(url, max_length, "tuf: fetching");
        match tokio::time::timeout(timeout, self.download(parsed, max_length)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }
}
