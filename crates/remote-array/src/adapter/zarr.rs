//! Chunked store with consolidated metadata.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::fetch::{join_url, RangeFetcher};
use crate::resolver::{ReferenceManifest, ReferenceResolver};
use crate::types::{ArrayData, CacheStats, DType, DatasetDescriptor, GroupDescriptor, ReadOptions};

use super::chunked::ChunkedStore;
use super::{fetch_manifest, ArrayClient};

const MAX_SLICE_DIMS: usize = 3;

/// Client for a store whose metadata is consolidated in `.zmetadata`.
pub struct ZarrClient {
    url: String,
    store: ChunkedStore,
}

impl fmt::Debug for ZarrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZarrClient").field("url", &self.url).finish()
    }
}

impl ZarrClient {
    #[instrument(skip(fetcher, config))]
    pub async fn open(
        url: &str,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let base = url.trim_end_matches('/');
        let doc = fetch_manifest(fetcher.as_ref(), &join_url(base, ".zmetadata")).await?;
        let manifest = ReferenceManifest::from_consolidated(base, &doc)?;
        let resolver = ReferenceResolver::new(manifest, fetcher, config);
        let store = ChunkedStore::load(resolver).await?;

        info!(url = base, "Opened consolidated store");
        Ok(Self {
            url: base.to_string(),
            store,
        })
    }
}

#[async_trait]
impl ArrayClient for ZarrClient {
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
        let is_object = self
            .store
            .get_dataset(path)
            .map_or(false, |d| d.dtype == DType::Object);
        if is_object {
            self.store.read_first_chunk(path, options, MAX_SLICE_DIMS).await
        } else {
            self.store.read(path, options, MAX_SLICE_DIMS).await
        }
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

    use serde_json::json;

    use crate::error::RemoteArrayError;
    use crate::fetch::MemoryRangeFetcher;

    const BASE: &str = "mem://session.zarr";

    fn vlen(values: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in values {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        out
    }

    fn store() -> Arc<MemoryRangeFetcher> {
        let fetcher = Arc::new(MemoryRangeFetcher::new());
        let zmetadata = json!({
            "zarr_consolidated_format": 1,
            "metadata": {
                ".zgroup": {"zarr_format": 2},
                ".zattrs": {"session_id": "abc"},
                "trials/.zgroup": {"zarr_format": 2},
                "trials/start/.zarray": {
                    "shape": [5], "chunks": [2], "dtype": "<f8",
                    "compressor": null, "filters": null, "fill_value": 0.0, "order": "C"
                },
                "trials/label/.zarray": {
                    "shape": [3], "chunks": [3], "dtype": "|O",
                    "compressor": null, "filters": [{"id": "vlen-utf8"}],
                    "fill_value": 0, "order": "C"
                }
            }
        });
        fetcher.insert(format!("{}/.zmetadata", BASE), zmetadata.to_string());
        for (i, chunk) in [[0.5f64, 1.5], [2.5, 3.5], [4.5, 0.0]].iter().enumerate() {
            let bytes: Vec<u8> = chunk.iter().flat_map(|v| v.to_le_bytes()).collect();
            fetcher.insert(format!("{}/trials/start/{}", BASE, i), bytes);
        }
        fetcher.insert(
            format!("{}/trials/label/0", BASE),
            vlen(&["go", "", "stop"]),
        );
        fetcher
    }

    #[tokio::test]
    async fn test_open_reads_zmetadata_once() {
        let fetcher = store();
        let client = ZarrClient::open(BASE, fetcher.clone(), &ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(fetcher.request_count(), 1);

        let root = client.get_group("/").unwrap();
        assert_eq!(root.attrs.get("session_id"), Some(&json!("abc")));
        let trials = client.get_group("/trials").unwrap();
        let names: Vec<&str> = trials.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["label", "start"]);
    }

    #[tokio::test]
    async fn test_numeric_slice_across_chunks() {
        let fetcher = store();
        let client = ZarrClient::open(BASE, fetcher.clone(), &ClientConfig::default())
            .await
            .unwrap();
        fetcher.clear_log();

        let options = ReadOptions::new().with_slice(vec![(1, 4)]);
        let data = client
            .get_dataset_data("/trials/start", &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, ArrayData::Float64(vec![1.5, 2.5, 3.5]));
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn test_object_array_reads_first_chunk() {
        let fetcher = store();
        let client = ZarrClient::open(BASE, fetcher.clone(), &ClientConfig::default())
            .await
            .unwrap();

        let data = client
            .get_dataset_data("/trials/label", &ReadOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            data,
            ArrayData::Utf8(vec!["go".into(), "".into(), "stop".into()])
        );

        let options = ReadOptions::new().with_slice(vec![(1, 3)]);
        let data = client
            .get_dataset_data("/trials/label", &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, ArrayData::Utf8(vec!["".into(), "stop".into()]));
    }

    #[tokio::test]
    async fn test_missing_zmetadata() {
        let fetcher = Arc::new(MemoryRangeFetcher::new());
        let err = ZarrClient::open(BASE, fetcher, &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteArrayError::MalformedMetadata(_)));
    }
}
