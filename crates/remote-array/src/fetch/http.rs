//! HTTP range fetcher built on reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};

use super::RangeFetcher;

/// Fetches byte ranges over HTTP with `Range` headers.
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl HttpRangeFetcher {
    /// Create a fetcher with timeouts taken from `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                RemoteArrayError::Config(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send a request, aborting it if `cancel` fires first.
    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RemoteArrayError::Cancelled),
            response = request.send() => {
                response.map_err(|e| RemoteArrayError::fetch_failed(url, e.to_string()))
            }
        }
    }

    async fn body(&self, url: &str, response: Response, cancel: &CancellationToken) -> Result<Bytes> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RemoteArrayError::Cancelled),
            body = response.bytes() => {
                body.map_err(|e| RemoteArrayError::fetch_failed(url, e.to_string()))
            }
        }
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    #[instrument(skip(self, cancel), fields(url = %url))]
    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end_inclusive: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let requested = end_inclusive.saturating_sub(start) + 1;
        debug!(start, end_inclusive, "Range request");

        let request = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes={}-{}", start, end_inclusive));
        let response = self.send(url, request, cancel).await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let bytes = self.body(url, response, cancel).await?;
                if bytes.len() as u64 > requested {
                    return Err(RemoteArrayError::fetch_failed(
                        url,
                        format!(
                            "partial content of {} bytes exceeds the {} requested",
                            bytes.len(),
                            requested
                        ),
                    ));
                }
                Ok(bytes)
            }
            StatusCode::OK => {
                // The server ignored the Range header and sent everything.
                let bytes = self.body(url, response, cancel).await?;
                warn!(
                    received = bytes.len(),
                    requested,
                    "Server ignored Range header, slicing full response"
                );
                let from = (start as usize).min(bytes.len());
                let to = ((end_inclusive as usize).saturating_add(1))
                    .min(bytes.len())
                    .max(from);
                Ok(bytes.slice(from..to))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            status => Err(RemoteArrayError::fetch_failed(
                url,
                format!("HTTP status {}", status),
            )),
        }
    }

    #[instrument(skip(self, cancel), fields(url = %url))]
    async fn fetch_object(&self, url: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        let response = self.send(url, self.client.get(url), cancel).await?;

        match response.status() {
            StatusCode::OK => Ok(Some(self.body(url, response, cancel).await?)),
            StatusCode::NOT_FOUND => {
                debug!("Object not found");
                Ok(None)
            }
            status => Err(RemoteArrayError::fetch_failed(
                url,
                format!("HTTP status {}", status),
            )),
        }
    }
}
