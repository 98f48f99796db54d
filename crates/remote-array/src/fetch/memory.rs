//! In-memory fetcher with a request log.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteArrayError, Result};

use super::RangeFetcher;

/// One request observed by a [`MemoryRangeFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRecord {
    Range { url: String, start: u64, end_inclusive: u64 },
    Object { url: String },
}

impl FetchRecord {
    pub fn url(&self) -> &str {
        match self {
            FetchRecord::Range { url, .. } | FetchRecord::Object { url } => url,
        }
    }
}

/// Serves objects held in memory and records every request it receives.
///
/// Useful for local files and as a fetch-count spy in tests. An optional
/// latency keeps requests pending long enough for concurrent callers to
/// overlap.
#[derive(Debug, Default)]
pub struct MemoryRangeFetcher {
    objects: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<FetchRecord>>,
    latency: Option<Duration>,
}

impl MemoryRangeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace an object.
    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.lock().insert(url.into(), data.into());
    }

    /// Make every request for `url` fail with a transient error until
    /// [`MemoryRangeFetcher::recover`] is called.
    pub fn fail(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<FetchRecord> {
        self.log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Number of requests that targeted `url`.
    pub fn requests_for(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|r| r.url() == url).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    async fn respond(&self, url: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        if let Some(latency) = self.latency {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RemoteArrayError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(RemoteArrayError::Cancelled);
        }

        if self.failing.lock().contains(url) {
            return Err(RemoteArrayError::fetch_failed(url, "simulated failure"));
        }
        Ok(self.objects.lock().get(url).cloned())
    }
}

#[async_trait]
impl RangeFetcher for MemoryRangeFetcher {
    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end_inclusive: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.log.lock().push(FetchRecord::Range {
            url: url.to_string(),
            start,
            end_inclusive,
        });

        let data = self
            .respond(url, cancel)
            .await?
            .ok_or_else(|| RemoteArrayError::fetch_failed(url, "HTTP status 404 Not Found"))?;

        let from = (start as usize).min(data.len());
        let to = (end_inclusive as usize).saturating_add(1).min(data.len());
        Ok(data.slice(from..to.max(from)))
    }

    async fn fetch_object(&self, url: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        self.log.lock().push(FetchRecord::Object {
            url: url.to_string(),
        });
        self.respond(url, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_range_is_clamped_to_object() {
        let fetcher = MemoryRangeFetcher::new();
        fetcher.insert("mem://a", vec![0u8, 1, 2, 3, 4]);
        let cancel = CancellationToken::new();

        let bytes = fetcher.fetch_range("mem://a", 1, 2, &cancel).await.unwrap();
        assert_eq!(&bytes[..], &[1, 2]);

        let bytes = fetcher.fetch_range("mem://a", 3, 100, &cancel).await.unwrap();
        assert_eq!(&bytes[..], &[3, 4]);

        let bytes = fetcher.fetch_range("mem://a", 10, 20, &cancel).await.unwrap();
        assert!(bytes.is_empty());

        assert_eq!(fetcher.requests_for("mem://a"), 3);
    }

    #[tokio::test]
    async fn test_missing_and_failing_objects() {
        let fetcher = MemoryRangeFetcher::new();
        let cancel = CancellationToken::new();
        assert_eq!(fetcher.fetch_object("mem://none", &cancel).await, Ok(None));
        assert!(fetcher.fetch_range("mem://none", 0, 1, &cancel).await.is_err());

        fetcher.insert("mem://b", vec![1u8]);
        fetcher.fail("mem://b");
        let err = fetcher.fetch_object("mem://b", &cancel).await.unwrap_err();
        assert!(err.is_transient());

        fetcher.recover("mem://b");
        assert!(fetcher.fetch_object("mem://b", &cancel).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancel_during_latency() {
        let fetcher = MemoryRangeFetcher::new().with_latency(Duration::from_secs(60));
        fetcher.insert("mem://slow", vec![1u8]);
        let cancel = CancellationToken::new();

        let request = fetcher.fetch_object("mem://slow", &cancel);
        cancel.cancel();
        assert_eq!(request.await, Err(RemoteArrayError::Cancelled));
    }
}
