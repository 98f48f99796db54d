//! Reference filesystem adapter with external links.
//!
//! A dataset may point at a dataset in another file, either through an
//! `.external_hdf5` document next to its metadata or through the
//! `_EXTERNAL_ARRAY_LINK` attribute. Both hold `{url, name}`; reads of such
//! a dataset are handed to the client the registry keeps for `url`.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};
use crate::fetch::RangeFetcher;
use crate::registry::{ClientRegistry, RegistryInner};
use crate::resolver::marker_key;
use crate::slice::check_slice_dims;
use crate::types::{ArrayData, CacheStats, DatasetDescriptor, GroupDescriptor, ReadOptions};

use super::chunked::ChunkedStore;
use super::hierarchy::{normalize_path, path_to_key};
use super::reffs::load_reference_store;
use super::{ArrayClient, SourceFormat};

const MAX_SLICE_DIMS: usize = 3;

/// Marker document placed beside a linked dataset's metadata.
pub const EXTERNAL_MARKER: &str = ".external_hdf5";

/// Attribute carrying a link on the dataset itself.
pub const EXTERNAL_LINK_ATTR: &str = "_EXTERNAL_ARRAY_LINK";

/// Target of an external link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub url: String,
    /// Dataset path inside the target file.
    pub name: String,
}

impl ExternalLink {
    /// Format of the target. Links always name a whole binary file, so a
    /// link back to a manifest fails to open instead of recursing.
    pub fn format(&self) -> SourceFormat {
        SourceFormat::FlatBinary
    }
}

/// Client for a reference manifest whose datasets may link to other files.
pub struct LinkedReferenceClient {
    url: String,
    store: ChunkedStore,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for LinkedReferenceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedReferenceClient")
            .field("url", &self.url)
            .finish()
    }
}

impl LinkedReferenceClient {
    #[instrument(skip(fetcher, config, registry))]
    pub(crate) async fn open(
        url: &str,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
        registry: Weak<RegistryInner>,
    ) -> Result<Self> {
        let store = load_reference_store(url, fetcher, config).await?;
        info!(url, "Opened reference filesystem with links");
        Ok(Self {
            url: url.to_string(),
            store,
            registry,
        })
    }

    /// The external link of the dataset at `path`, if it has one. The marker
    /// document takes precedence over the attribute.
    pub async fn external_link(
        &self,
        path: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<ExternalLink>> {
        let path = normalize_path(path);
        let marker = marker_key(path_to_key(&path), EXTERNAL_MARKER);
        if let Some(value) = self.store.resolver().read_json(&marker, cancel).await? {
            return serde_json::from_value(value).map(Some).map_err(|e| {
                RemoteArrayError::malformed(format!("{} of {}: {}", EXTERNAL_MARKER, path, e))
            });
        }

        let Some(value) = self
            .store
            .get_dataset(&path)
            .and_then(|d| d.attrs.get(EXTERNAL_LINK_ATTR).cloned())
        else {
            return Ok(None);
        };
        serde_json::from_value(value).map(Some).map_err(|e| {
            RemoteArrayError::malformed(format!("{} of {}: {}", EXTERNAL_LINK_ATTR, path, e))
        })
    }

    async fn read_linked(
        &self,
        link: &ExternalLink,
        options: &ReadOptions,
    ) -> Result<Option<ArrayData>> {
        let inner = self.registry.upgrade().ok_or_else(|| {
            RemoteArrayError::Config("client registry dropped before an external link was read".into())
        })?;
        let client = ClientRegistry::from_inner(inner)
            .get_client(&link.url, Some(link.format()))
            .await?;
        client.get_dataset_data(&link.name, options).await
    }
}

#[async_trait]
impl ArrayClient for LinkedReferenceClient {
    fn get_group(&self, path: &str) -> Option<GroupDescriptor> {
        self.store.get_group(path)
    }

    fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        self.store.get_dataset(path)
    }

    #[instrument(skip(self, options), fields(url = %self.url))]
    async fn get_dataset_data(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<Option<ArrayData>> {
        check_slice_dims(options.slice_dims(), MAX_SLICE_DIMS)?;

        if let Some(link) = self.external_link(path, options.cancel.as_ref()).await? {
            debug!(path, target = %link.url, name = %link.name, "Following external link");
            return self.read_linked(&link, options).await;
        }
        self.store.read(path, options, MAX_SLICE_DIMS).await
    }

    fn max_slice_dims(&self) -> usize {
        MAX_SLICE_DIMS
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn cache_stats(&self) -> CacheStats {
        self.store.cache_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_format() {
        for url in [
            "https://h/raw.nh5",
            "https://h/other.zarr",
            "https://h/recording.nwb.lindi.json",
            "https://h/blob?id=1",
        ] {
            let link = ExternalLink {
                url: url.into(),
                name: "/x".into(),
            };
            assert_eq!(link.format(), SourceFormat::FlatBinary);
        }
    }

    #[test]
    fn test_link_serde() {
        let link: ExternalLink =
            serde_json::from_value(serde_json::json!({"url": "u", "name": "/a"})).unwrap();
        assert_eq!(link.name, "/a");
        assert!(serde_json::from_value::<ExternalLink>(serde_json::json!({"url": "u"})).is_err());
    }
}
