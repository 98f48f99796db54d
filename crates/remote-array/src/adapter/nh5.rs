//! NH5 flat binary container adapter.
//!
//! Layout: the ASCII prefix `nh5|1|<headerLength>|`, then `headerLength`
//! bytes of header JSON, then the payload. Dataset positions in the header
//! are relative to the end of the header JSON.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::RequestCache;
use crate::codec::decode_numeric;
use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};
use crate::fetch::RangeFetcher;
use crate::resolver::parse_json;
use crate::slice::{check_slice_dims, contiguous_row_window, Selection};
use crate::types::{
    ArrayData, Attributes, ByteOrder, CacheStats, DType, DatasetDescriptor, GroupDescriptor,
    ReadOptions,
};

use super::hierarchy::{normalize_path, Hierarchy};
use super::ArrayClient;

const MAGIC: &[u8] = b"nh5|";
const VERSION: &str = "1";
const MAX_SLICE_DIMS: usize = 1;

/// Location of the header JSON inside an NH5 file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nh5Header {
    /// Offset of the first byte of header JSON.
    pub header_start: u64,
    pub header_length: u64,
}

impl Nh5Header {
    /// Parse the `nh5|1|<headerLength>|` prefix at the start of `data`.
    pub fn parse_prefix(data: &[u8]) -> Result<Self> {
        if !data.starts_with(MAGIC) {
            return Err(RemoteArrayError::malformed("missing nh5 magic"));
        }

        let mut fields = Vec::with_capacity(2);
        let mut field_start = MAGIC.len();
        for (i, &b) in data.iter().enumerate().skip(MAGIC.len()).take(32) {
            if b == b'|' {
                fields.push(&data[field_start..i]);
                field_start = i + 1;
                if fields.len() == 2 {
                    break;
                }
            }
        }
        let (version, length) = match fields.as_slice() {
            [version, length] => (*version, *length),
            _ => return Err(RemoteArrayError::malformed("truncated nh5 prefix")),
        };

        if version != VERSION.as_bytes() {
            return Err(RemoteArrayError::malformed(format!(
                "unsupported nh5 version {:?}",
                String::from_utf8_lossy(version)
            )));
        }
        let header_length = std::str::from_utf8(length)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                RemoteArrayError::malformed(format!(
                    "invalid nh5 header length {:?}",
                    String::from_utf8_lossy(length)
                ))
            })?;

        Ok(Self {
            header_start: field_start as u64,
            header_length,
        })
    }

    /// Offset of the payload region.
    pub fn data_position(&self) -> u64 {
        self.header_start + self.header_length
    }
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    groups: Vec<RawGroup>,
    #[serde(default)]
    datasets: Vec<RawDataset>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    path: String,
    #[serde(default)]
    attrs: Attributes,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    path: String,
    #[serde(default)]
    attrs: Attributes,
    dtype: String,
    shape: Vec<u64>,
    position: u64,
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    position: u64,
    order: ByteOrder,
}

/// Client for an NH5 file.
pub struct Nh5Client {
    url: String,
    fetcher: Arc<dyn RangeFetcher>,
    hierarchy: Hierarchy,
    placements: HashMap<String, Placement>,
    data_position: u64,
    /// Keyed by inclusive byte range.
    cache: RequestCache<(u64, u64), Bytes>,
}

impl fmt::Debug for Nh5Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nh5Client")
            .field("url", &self.url)
            .field("data_position", &self.data_position)
            .field("datasets", &self.placements.len())
            .finish()
    }
}

impl Nh5Client {
    /// Fetch and parse the header of the file at `url`.
    #[instrument(skip(fetcher, config))]
    pub async fn open(
        url: &str,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let window_end = config.header_window_bytes.max(1) - 1;
        let window = fetcher.fetch_range(url, 0, window_end, &cancel).await?;

        let header = Nh5Header::parse_prefix(&window)?;
        let data_position = header.data_position();
        let header_start = header.header_start as usize;

        let json = if window.len() as u64 >= data_position {
            window.slice(header_start..data_position as usize)
        } else {
            debug!(
                window = window.len(),
                data_position, "Header exceeds the first window, fetching the rest"
            );
            let rest = fetcher
                .fetch_range(url, window.len() as u64, data_position - 1, &cancel)
                .await?;
            let mut buf = Vec::with_capacity(header.header_length as usize);
            buf.extend_from_slice(&window[header_start..]);
            buf.extend_from_slice(&rest);
            if (buf.len() as u64) < header.header_length {
                return Err(RemoteArrayError::malformed(format!(
                    "nh5 header truncated: {} of {} bytes",
                    buf.len(),
                    header.header_length
                )));
            }
            Bytes::from(buf)
        };

        let raw: RawHeader = serde_json::from_value(parse_json(&json)?)?;

        let mut hierarchy = Hierarchy::new();
        for group in raw.groups {
            hierarchy.insert_group(&group.path, group.attrs);
        }

        let mut placements = HashMap::with_capacity(raw.datasets.len());
        for ds in raw.datasets {
            let (dtype, order) = DType::parse(&ds.dtype).ok_or_else(|| {
                RemoteArrayError::malformed(format!("dataset {} has unknown dtype {}", ds.path, ds.dtype))
            })?;
            if dtype == DType::Object {
                return Err(RemoteArrayError::malformed(format!(
                    "dataset {} is not numeric",
                    ds.path
                )));
            }
            let path = normalize_path(&ds.path);
            hierarchy.insert_dataset(DatasetDescriptor {
                path: path.clone(),
                shape: ds.shape,
                dtype,
                attrs: ds.attrs,
            });
            placements.insert(
                path,
                Placement {
                    position: ds.position,
                    order,
                },
            );
        }

        info!(
            groups = hierarchy.num_groups(),
            datasets = placements.len(),
            data_position,
            "Opened NH5 file"
        );

        Ok(Self {
            url: url.to_string(),
            fetcher,
            hierarchy,
            placements,
            data_position,
            cache: RequestCache::new(config.failure_ttl()),
        })
    }

    pub fn data_position(&self) -> u64 {
        self.data_position
    }
}

#[async_trait]
impl ArrayClient for Nh5Client {
    fn get_group(&self, path: &str) -> Option<GroupDescriptor> {
        self.hierarchy.get_group(path)
    }

    fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        self.hierarchy.get_dataset(path).cloned()
    }

    #[instrument(skip(self, options), fields(url = %self.url))]
    async fn get_dataset_data(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<Option<ArrayData>> {
        check_slice_dims(options.slice_dims(), MAX_SLICE_DIMS)?;

        let path = normalize_path(path);
        let (Some(desc), Some(placement)) =
            (self.hierarchy.get_dataset(&path), self.placements.get(&path))
        else {
            debug!(path = %path, "Dataset not found");
            return Ok(None);
        };
        let selection = Selection::resolve(&desc.shape, options.slice.as_deref(), MAX_SLICE_DIMS)?;

        let width = desc.dtype.byte_width().unwrap_or(1) as u64;
        let rows = options.slice.as_ref().and_then(|s| s.first().copied());
        let (offset, length) = contiguous_row_window(&desc.shape, width, rows);
        let count = selection.num_elements() as usize;
        if length == 0 {
            return ArrayData::filled(desc.dtype, 0, 0.0).map(Some);
        }

        let start = self.data_position + placement.position + offset;
        let end = start + length - 1;
        let fetcher = self.fetcher.clone();
        let url = self.url.clone();
        let bytes = self
            .cache
            .get_or_load(&(start, end), options.cancel.as_ref(), move |token| {
                async move { fetcher.fetch_range(&url, start, end, &token).await.map(Some) }
            })
            .await?
            .unwrap_or_default();

        if bytes.len() as u64 != length {
            return Err(RemoteArrayError::corrupt(format!(
                "{} wanted {} bytes at {}, got {}",
                path,
                length,
                start,
                bytes.len()
            )));
        }

        decode_numeric(&bytes, desc.dtype, placement.order, count).map(Some)
    }

    fn max_slice_dims(&self) -> usize {
        MAX_SLICE_DIMS
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
