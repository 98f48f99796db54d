//! Reference filesystem adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::fetch::RangeFetcher;
use crate::resolver::{ReferenceManifest, ReferenceResolver};
use crate::types::{ArrayData, CacheStats, DatasetDescriptor, GroupDescriptor, ReadOptions};

use super::chunked::ChunkedStore;
use super::{fetch_manifest, ArrayClient};

const MAX_SLICE_DIMS: usize = 2;

/// Client for a `{version, refs}` reference manifest.
pub struct ReferenceFsClient {
    url: String,
    store: ChunkedStore,
}

impl fmt::Debug for ReferenceFsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceFsClient")
            .field("url", &self.url)
            .finish()
    }
}

impl ReferenceFsClient {
    #[instrument(skip(fetcher, config))]
    pub async fn open(
        url: &str,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let store = load_reference_store(url, fetcher, config).await?;
        info!(url, "Opened reference filesystem");
        Ok(Self {
            url: url.to_string(),
            store,
        })
    }
}

/// Fetch a reference manifest and index it.
pub(crate) async fn load_reference_store(
    url: &str,
    fetcher: Arc<dyn RangeFetcher>,
    config: &ClientConfig,
) -> Result<ChunkedStore> {
    let doc = fetch_manifest(fetcher.as_ref(), url).await?;
    let manifest = ReferenceManifest::from_refs_document(&doc)?;
    ChunkedStore::load(ReferenceResolver::new(manifest, fetcher, config)).await
}

#[async_trait]
impl ArrayClient for ReferenceFsClient {
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

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    use crate::error::RemoteArrayError;
    use crate::fetch::MemoryRangeFetcher;

    const MANIFEST: &str = "mem://rec.json";
    const DATA: &str = "mem://rec.h5";

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn client() -> (ReferenceFsClient, Arc<MemoryRangeFetcher>) {
        let values: Vec<u8> = (0u16..12).flat_map(|v| v.to_le_bytes()).collect();
        let compressed = zlib(&values);

        let manifest = json!({
            "version": 1,
            "refs": {
                ".zgroup": "{\"zarr_format\": 2}",
                ".zattrs": "{\"nwb_version\": \"2.6.0\", \"gain\": NaN}",
                "ecephys/.zgroup": {"zarr_format": 2},
                "ecephys/volts/.zarray": {
                    "shape": [2, 3, 2], "chunks": [2, 3, 2], "dtype": "<u2",
                    "compressor": {"id": "zlib", "level": 1},
                    "filters": null, "fill_value": 0, "order": "C"
                },
                "ecephys/volts/0.0.0": [DATA, 0, compressed.len()]
            }
        });

        let fetcher = Arc::new(MemoryRangeFetcher::new());
        fetcher.insert(MANIFEST, manifest.to_string());
        fetcher.insert(DATA, compressed);
        let client = ReferenceFsClient::open(MANIFEST, fetcher.clone(), &ClientConfig::default())
            .await
            .unwrap();
        (client, fetcher)
    }

    #[tokio::test]
    async fn test_metadata_with_nan_attribute() {
        let (client, _) = client().await;
        let root = client.get_group("/").unwrap();
        assert_eq!(root.attrs.get("gain"), Some(&json!("NaN")));
        assert_eq!(root.subgroups[0].path, "/ecephys");
        assert_eq!(client.get_dataset("/ecephys/volts").unwrap().shape, vec![2, 3, 2]);
    }

    #[tokio::test]
    async fn test_two_dim_slice_of_compressed_chunk() {
        let (client, _) = client().await;
        let options = ReadOptions::new().with_slice(vec![(1, 2), (0, 2)]);
        let data = client
            .get_dataset_data("/ecephys/volts", &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, ArrayData::UInt16(vec![6, 7, 8, 9]));
    }

    #[tokio::test]
    async fn test_three_dim_slice_is_rejected_without_io() {
        let (client, fetcher) = client().await;
        fetcher.clear_log();

        let options = ReadOptions::new().with_slice(vec![(0, 1), (0, 1), (0, 1)]);
        let err = client
            .get_dataset_data("/ecephys/volts", &options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteArrayError::UnsupportedSlice {
                requested: 3,
                supported: 2
            }
        );
        assert_eq!(fetcher.request_count(), 0);
    }
}
