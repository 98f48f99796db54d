//! Registry of open clients.
//!
//! The `ClientRegistry` manages:
//! - One client per `(url, format)`, opened on first use
//! - The fetcher shared by every client
//! - Common configuration settings
//!
//! # Example
//!
//! ```rust,ignore
//! use remote_array::{ArrayClient, ClientConfig, ClientRegistry, ReadOptions};
//!
//! let registry = ClientRegistry::with_http(ClientConfig::from_env())?;
//! let client = registry.get_client("https://host/rec.nh5", None).await?;
//! let data = client.get_dataset_data("/x", &ReadOptions::new()).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::adapter::{RemoteClient, SourceFormat};
use crate::binned::BinnedArrayClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::fetch::{HttpRangeFetcher, RangeFetcher};

type ClientKey = (String, SourceFormat);

pub(crate) struct RegistryInner {
    fetcher: Arc<dyn RangeFetcher>,
    config: ClientConfig,
    /// Held across client construction so each key is opened once.
    clients: Mutex<HashMap<ClientKey, Arc<RemoteClient>>>,
    metadata_loads: AtomicU64,
}

/// Opens clients and hands out the same instance for repeated requests.
///
/// Cloning is cheap and clones share their clients. Linked adapters hold a
/// weak reference back to the registry, so dropping every clone releases
/// all clients.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.inner.config)
            .field("metadata_loads", &self.metadata_loads())
            .finish()
    }
}

impl ClientRegistry {
    /// Create a registry that fetches through `fetcher`.
    pub fn new(fetcher: Arc<dyn RangeFetcher>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                fetcher,
                config,
                clients: Mutex::new(HashMap::new()),
                metadata_loads: AtomicU64::new(0),
            }),
        }
    }

    /// Create a registry backed by an HTTP fetcher.
    pub fn with_http(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpRangeFetcher::new(&config)?;
        Ok(Self::new(Arc::new(fetcher), config))
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn fetcher(&self) -> Arc<dyn RangeFetcher> {
        self.inner.fetcher.clone()
    }

    /// Get the client for `url`, opening it if needed.
    ///
    /// Without a format the format is detected from the URL. A client that
    /// fails to open is not kept, so a later call tries again.
    #[instrument(skip(self))]
    pub async fn get_client(
        &self,
        url: &str,
        format: Option<SourceFormat>,
    ) -> Result<Arc<RemoteClient>> {
        let format = match format {
            Some(format) => format,
            None => SourceFormat::detect(url)?,
        };
        let key = (url.to_string(), format);

        let mut clients = self.inner.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            debug!(%format, "Reusing client");
            return Ok(client.clone());
        }

        let client = RemoteClient::open(
            url,
            format,
            self.inner.fetcher.clone(),
            &self.inner.config,
            Arc::downgrade(&self.inner),
        )
        .await?;
        self.inner.metadata_loads.fetch_add(1, Ordering::Relaxed);
        info!(%format, "Opened client");

        let client = Arc::new(client);
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Open a binned array stored under `path` of the source at `url`.
    pub async fn get_binned(
        &self,
        url: &str,
        format: Option<SourceFormat>,
        path: &str,
    ) -> Result<BinnedArrayClient> {
        let client = self.get_client(url, format).await?;
        BinnedArrayClient::open(client, path, &self.inner.config)
    }

    /// Drop every client. Clients already handed out stay usable.
    pub async fn reset(&self) {
        let mut clients = self.inner.clients.lock().await;
        info!(clients = clients.len(), "Resetting client registry");
        clients.clear();
    }

    /// Number of open clients.
    pub async fn len(&self) -> usize {
        self.inner.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of clients opened so far, counting reopens after a reset.
    pub fn metadata_loads(&self) -> u64 {
        self.inner.metadata_loads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::RemoteArrayError;
    use crate::fetch::MemoryRangeFetcher;

    #[tokio::test]
    async fn test_unknown_format_is_rejected_without_io() {
        let fetcher = Arc::new(MemoryRangeFetcher::new());
        let registry = ClientRegistry::new(fetcher.clone(), ClientConfig::default());

        let err = registry.get_client("mem://file.h5", None).await.unwrap_err();
        assert!(matches!(err, RemoteArrayError::UnsupportedFormat(_)));
        assert_eq!(fetcher.request_count(), 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_open_is_not_kept() {
        let fetcher = Arc::new(MemoryRangeFetcher::new());
        let registry = ClientRegistry::new(fetcher.clone(), ClientConfig::default());

        assert!(registry.get_client("mem://a.zarr", None).await.is_err());
        assert!(registry.get_client("mem://a.zarr", None).await.is_err());
        assert_eq!(fetcher.requests_for("mem://a.zarr/.zmetadata"), 2);
        assert_eq!(registry.metadata_loads(), 0);
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn test_with_http_validates_config() {
        let config = ClientConfig {
            request_timeout_secs: 0,
            ..ClientConfig::default()
        };
        assert!(ClientRegistry::with_http(config).is_err());
        assert!(ClientRegistry::with_http(ClientConfig::default()).is_ok());
    }
}
