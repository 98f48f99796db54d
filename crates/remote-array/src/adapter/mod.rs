//! Format adapters and the unified client type.
//!
//! Every adapter loads its metadata once when opened, then answers group and
//! dataset lookups from memory and dataset reads through the network.

mod chunked;
mod hierarchy;
mod linked;
mod nh5;
mod reffs;
mod zarr;

pub use chunked::ChunkedStore;
pub use hierarchy::{leaf_name, normalize_path, parent_path, Hierarchy};
pub use linked::{ExternalLink, LinkedReferenceClient};
pub use nh5::{Nh5Client, Nh5Header};
pub use reffs::ReferenceFsClient;
pub use zarr::ZarrClient;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};
use crate::fetch::RangeFetcher;
use crate::registry::RegistryInner;
use crate::resolver::parse_json;
use crate::types::{ArrayData, CacheStats, DatasetDescriptor, GroupDescriptor, ReadOptions};

/// Read access to one remote source.
#[async_trait]
pub trait ArrayClient: Send + Sync {
    /// Group at `path` with its direct children, `None` if there is none.
    ///
    /// Non-finite attribute values come back as the strings `"NaN"`,
    /// `"Infinity"` and `"-Infinity"`. See [`Attributes`](crate::types::Attributes).
    fn get_group(&self, path: &str) -> Option<GroupDescriptor>;

    /// Dataset at `path`, `None` if there is none.
    fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor>;

    /// Read a dataset, or the slice of it given in `options`.
    ///
    /// Slices are validated before any network access. Returns `None` if the
    /// dataset does not exist.
    async fn get_dataset_data(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<Option<ArrayData>>;

    /// Most slice dimensions a read may specify.
    fn max_slice_dims(&self) -> usize;

    /// URL the client was opened from.
    fn url(&self) -> &str;

    /// Statistics of the client's request cache.
    fn cache_stats(&self) -> CacheStats;
}

/// Container encoding of a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    /// NH5 flat binary container.
    FlatBinary,
    /// Chunked store with consolidated `.zmetadata`.
    ChunkedConsolidated,
    /// Reference filesystem manifest.
    ReferenceFs,
    /// Reference filesystem manifest with external links.
    ReferenceFsWithLinks,
}

impl SourceFormat {
    /// Guess the format from a URL's suffix.
    pub fn detect(url: &str) -> Result<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let path = path.trim_end_matches('/').to_ascii_lowercase();

        if path.ends_with(".nh5") {
            Ok(SourceFormat::FlatBinary)
        } else if path.ends_with(".zarr") {
            Ok(SourceFormat::ChunkedConsolidated)
        } else if path.ends_with(".lindi.json") {
            Ok(SourceFormat::ReferenceFsWithLinks)
        } else if path.ends_with(".json") {
            Ok(SourceFormat::ReferenceFs)
        } else {
            Err(RemoteArrayError::UnsupportedFormat(url.to_string()))
        }
    }

    /// Most slice dimensions the format's adapter supports.
    pub fn max_slice_dims(&self) -> usize {
        match self {
            SourceFormat::FlatBinary => 1,
            SourceFormat::ChunkedConsolidated => 3,
            SourceFormat::ReferenceFs => 2,
            SourceFormat::ReferenceFsWithLinks => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::FlatBinary => "flat-binary",
            SourceFormat::ChunkedConsolidated => "chunked-consolidated",
            SourceFormat::ReferenceFs => "reference-fs",
            SourceFormat::ReferenceFsWithLinks => "reference-fs-with-links",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = RemoteArrayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat-binary" | "nh5" => Ok(SourceFormat::FlatBinary),
            "chunked-consolidated" | "zarr" => Ok(SourceFormat::ChunkedConsolidated),
            "reference-fs" | "json" => Ok(SourceFormat::ReferenceFs),
            "reference-fs-with-links" | "lindi" => Ok(SourceFormat::ReferenceFsWithLinks),
            other => Err(RemoteArrayError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Fetch and parse a JSON manifest document.
pub(crate) async fn fetch_manifest(
    fetcher: &dyn RangeFetcher,
    url: &str,
) -> Result<serde_json::Value> {
    let bytes: Bytes = fetcher
        .fetch_object(url, &CancellationToken::new())
        .await?
        .ok_or_else(|| RemoteArrayError::malformed(format!("manifest {} not found", url)))?;
    parse_json(&bytes)
}

/// A client for any supported format.
#[derive(Debug)]
pub enum RemoteClient {
    FlatBinary(Nh5Client),
    ChunkedConsolidated(ZarrClient),
    ReferenceFs(ReferenceFsClient),
    ReferenceFsWithLinks(LinkedReferenceClient),
}

impl RemoteClient {
    /// Open `url` with the adapter for `format`, loading its metadata.
    pub(crate) async fn open(
        url: &str,
        format: SourceFormat,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
        registry: Weak<RegistryInner>,
    ) -> Result<Self> {
        Ok(match format {
            SourceFormat::FlatBinary => {
                RemoteClient::FlatBinary(Nh5Client::open(url, fetcher, config).await?)
            }
            SourceFormat::ChunkedConsolidated => {
                RemoteClient::ChunkedConsolidated(ZarrClient::open(url, fetcher, config).await?)
            }
            SourceFormat::ReferenceFs => {
                RemoteClient::ReferenceFs(ReferenceFsClient::open(url, fetcher, config).await?)
            }
            SourceFormat::ReferenceFsWithLinks => RemoteClient::ReferenceFsWithLinks(
                LinkedReferenceClient::open(url, fetcher, config, registry).await?,
            ),
        })
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            RemoteClient::FlatBinary(_) => SourceFormat::FlatBinary,
            RemoteClient::ChunkedConsolidated(_) => SourceFormat::ChunkedConsolidated,
            RemoteClient::ReferenceFs(_) => SourceFormat::ReferenceFs,
            RemoteClient::ReferenceFsWithLinks(_) => SourceFormat::ReferenceFsWithLinks,
        }
    }

    fn inner(&self) -> &dyn ArrayClient {
        match self {
            RemoteClient::FlatBinary(c) => c,
            RemoteClient::ChunkedConsolidated(c) => c,
            RemoteClient::ReferenceFs(c) => c,
            RemoteClient::ReferenceFsWithLinks(c) => c,
        }
    }
}

#[async_trait]
impl ArrayClient for RemoteClient {
    fn get_group(&self, path: &str) -> Option<GroupDescriptor> {
        self.inner().get_group(path)
    }

    fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        self.inner().get_dataset(path)
    }

    async fn get_dataset_data(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<Option<ArrayData>> {
        self.inner().get_dataset_data(path, options).await
    }

    fn max_slice_dims(&self) -> usize {
        self.inner().max_slice_dims()
    }

    fn url(&self) -> &str {
        self.inner().url()
    }

    fn cache_stats(&self) -> CacheStats {
        self.inner().cache_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            SourceFormat::detect("https://h/a/file.nh5").unwrap(),
            SourceFormat::FlatBinary
        );
        assert_eq!(
            SourceFormat::detect("https://h/a/store.zarr/").unwrap(),
            SourceFormat::ChunkedConsolidated
        );
        assert_eq!(
            SourceFormat::detect("https://h/a/x.nwb.lindi.json?v=2").unwrap(),
            SourceFormat::ReferenceFsWithLinks
        );
        assert_eq!(
            SourceFormat::detect("https://h/a/refs.JSON").unwrap(),
            SourceFormat::ReferenceFs
        );
        assert!(matches!(
            SourceFormat::detect("https://h/a/file.h5"),
            Err(RemoteArrayError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_format_names() {
        for format in [
            SourceFormat::FlatBinary,
            SourceFormat::ChunkedConsolidated,
            SourceFormat::ReferenceFs,
            SourceFormat::ReferenceFsWithLinks,
        ] {
            assert_eq!(format.as_str().parse::<SourceFormat>().unwrap(), format);
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{}\"", format.as_str()));
        }
        assert_eq!("zarr".parse::<SourceFormat>().unwrap(), SourceFormat::ChunkedConsolidated);
        assert!("hdf5".parse::<SourceFormat>().is_err());
    }

    #[test]
    fn test_slice_limits() {
        assert_eq!(SourceFormat::FlatBinary.max_slice_dims(), 1);
        assert_eq!(SourceFormat::ChunkedConsolidated.max_slice_dims(), 3);
        assert_eq!(SourceFormat::ReferenceFs.max_slice_dims(), 2);
        assert_eq!(SourceFormat::ReferenceFsWithLinks.max_slice_dims(), 3);
    }
}
