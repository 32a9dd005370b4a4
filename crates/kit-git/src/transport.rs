//! Blocking request/response transport for smart HTTP.

use crate::{GitError, Result};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

/// User agent sent with every request.
pub const AGENT: &str = concat!("kit/", env!("CARGO_PKG_VERSION"));

/// A fully-buffering request/response channel.
///
/// Implementations must map a non-success status to [`GitError::Http`]
/// and connection-level failures to [`GitError::Transport`].
pub trait Transport {
    /// Fetches `url` and returns the body.
    fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Posts `body` to `url` and returns the response body.
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        (**self).get(url)
    }

    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>> {
        (**self).post(url, content_type, body)
    }
}

/// HTTP transport built on `reqwest`'s blocking client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GitError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn send(&self, url: &str, request: reqwest::blocking::RequestBuilder) -> Result<Vec<u8>> {
        let response = request
            .header(USER_AGENT, AGENT)
            .send()
            .map_err(|e| GitError::Transport(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "request failed");
            return Err(GitError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .map_err(|e| GitError::Transport(format!("{}: {}", url, e)))?;
        tracing::debug!(url = %url, bytes = body.len(), "response received");
        Ok(body.to_vec())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.send(url, self.client.get(url))
    }

    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>> {
        self.send(
            url,
            self.client
                .post(url)
                .header(CONTENT_TYPE, content_type)
                .body(body.to_vec()),
        )
    }
}
