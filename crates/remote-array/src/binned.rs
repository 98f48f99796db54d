//! Binned (decimated) time series reader.
//!
//! A binned array is a group holding two `[numBins, numChannels]` datasets,
//! `data_min` and `data_max`, with the per-bin envelope of a long
//! multichannel recording. Reads return the envelope height `max - min` per
//! bin and channel, fetched in fixed-size chunks that are cached forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapter::{ArrayClient, RemoteClient};
use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};
use crate::types::{Attributes, ReadOptions};

/// Rows of `num_channels` values.
pub type BinnedChunk = Vec<Vec<f32>>;

/// Reader for the binned array stored under one group.
pub struct BinnedArrayClient {
    client: Arc<RemoteClient>,
    path: String,
    num_bins: u64,
    num_channels: u64,
    bin_size_sec: f64,
    bin_size_frames: u64,
    chunk_size: u64,
    chunks: Mutex<HashMap<u64, Arc<BinnedChunk>>>,
}

impl fmt::Debug for BinnedArrayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinnedArrayClient")
            .field("path", &self.path)
            .field("num_bins", &self.num_bins)
            .field("num_channels", &self.num_channels)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

fn attr_u64(attrs: &Attributes, name: &str) -> Option<u64> {
    attrs.get(name).and_then(|v| match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        _ => None,
    })
}

impl BinnedArrayClient {
    /// Read the binned array parameters of the group at `path`.
    ///
    /// `num_bins` and `num_channels` come from the group attributes, or from
    /// the shape of `data_min` when the attributes are absent.
    pub fn open(client: Arc<RemoteClient>, path: &str, config: &ClientConfig) -> Result<Self> {
        let path = crate::adapter::normalize_path(path);
        let group = client.get_group(&path).ok_or_else(|| {
            RemoteArrayError::malformed(format!("binned array group {} not found", path))
        })?;
        let min_shape = client
            .get_dataset(&dataset_path(&path, "data_min"))
            .map(|d| d.shape);

        let num_bins = attr_u64(&group.attrs, "num_bins")
            .or_else(|| min_shape.as_ref().and_then(|s| s.first().copied()))
            .ok_or_else(|| {
                RemoteArrayError::malformed(format!("{} has neither num_bins nor data_min", path))
            })?;
        let num_channels = attr_u64(&group.attrs, "num_channels")
            .or_else(|| min_shape.as_ref().map(|s| s.get(1).copied().unwrap_or(1)))
            .ok_or_else(|| {
                RemoteArrayError::malformed(format!(
                    "{} has neither num_channels nor data_min",
                    path
                ))
            })?;
        if num_channels == 0 {
            return Err(RemoteArrayError::malformed(format!(
                "{} has zero channels",
                path
            )));
        }

        let bin_size_sec = group
            .attrs
            .get("bin_size_sec")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let bin_size_frames = attr_u64(&group.attrs, "bin_size_frames").unwrap_or(0);
        let chunk_size = (config.binned_chunk_budget as u64 / num_channels).max(1);

        debug!(
            path = %path,
            num_bins,
            num_channels,
            chunk_size,
            "Opened binned array"
        );

        Ok(Self {
            client,
            path,
            num_bins,
            num_channels,
            bin_size_sec,
            bin_size_frames,
            chunk_size,
            chunks: Mutex::new(HashMap::new()),
        })
    }

    pub fn num_bins(&self) -> u64 {
        self.num_bins
    }

    pub fn num_channels(&self) -> u64 {
        self.num_channels
    }

    pub fn bin_size_sec(&self) -> f64 {
        self.bin_size_sec
    }

    pub fn bin_size_frames(&self) -> u64 {
        self.bin_size_frames
    }

    /// Bins per fetched chunk.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks held in the cache.
    pub fn cached_chunks(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Envelope heights of bins `start_bin..end_bin`, one row of
    /// `num_channels` values per bin.
    ///
    /// Chunks that cannot be read are returned as zeros rather than failing
    /// the whole request.
    #[instrument(skip(self), fields(path = %self.path))]
    pub async fn get_data(&self, start_bin: u64, end_bin: u64) -> Result<BinnedChunk> {
        if start_bin > end_bin || end_bin > self.num_bins {
            return Err(RemoteArrayError::invalid_slice(format!(
                "bins [{}, {}) outside [0, {})",
                start_bin, end_bin, self.num_bins
            )));
        }
        if start_bin == end_bin {
            return Ok(Vec::new());
        }

        let first = start_bin / self.chunk_size;
        let last = (end_bin - 1) / self.chunk_size;
        let chunks = join_all((first..=last).map(|i| self.load_chunk(i))).await;

        let mut rows = Vec::with_capacity((end_bin - start_bin) as usize);
        for (i, chunk) in (first..=last).zip(chunks) {
            let chunk_start = i * self.chunk_size;
            let from = start_bin.max(chunk_start) - chunk_start;
            let to = end_bin.min(chunk_start + self.chunk_size) - chunk_start;
            rows.extend_from_slice(&chunk[from as usize..to as usize]);
        }
        Ok(rows)
    }

    /// Bin range covered by chunk `index`.
    fn chunk_bins(&self, index: u64) -> (u64, u64) {
        let start = index * self.chunk_size;
        (start, (start + self.chunk_size).min(self.num_bins))
    }

    async fn load_chunk(&self, index: u64) -> Arc<BinnedChunk> {
        let cached = self.chunks.lock().get(&index).cloned();
        if let Some(chunk) = cached {
            return chunk;
        }

        let (start, end) = self.chunk_bins(index);
        match self.fetch_chunk(start, end).await {
            Ok(chunk) => {
                let chunk = Arc::new(chunk);
                self.chunks.lock().insert(index, chunk.clone());
                chunk
            }
            Err(e) => {
                warn!(
                    path = %self.path,
                    chunk = index,
                    error = %e,
                    "Binned chunk unavailable, substituting zeros"
                );
                Arc::new(vec![vec![0.0; self.num_channels as usize]; (end - start) as usize])
            }
        }
    }

    async fn fetch_chunk(&self, start: u64, end: u64) -> Result<BinnedChunk> {
        let options = ReadOptions::new().with_slice(vec![(start, end)]);
        let min_path = dataset_path(&self.path, "data_min");
        let max_path = dataset_path(&self.path, "data_max");
        let (min, max) = futures::join!(
            self.client.get_dataset_data(&min_path, &options),
            self.client.get_dataset_data(&max_path, &options),
        );

        let (Some(min), Some(max)) = (min?, max?) else {
            return Err(RemoteArrayError::malformed(format!(
                "{} is missing data_min or data_max",
                self.path
            )));
        };
        let (Some(min), Some(max)) = (min.to_f64_vec(), max.to_f64_vec()) else {
            return Err(RemoteArrayError::malformed(format!(
                "{} envelope datasets are not numeric",
                self.path
            )));
        };

        let channels = self.num_channels as usize;
        let expected = (end - start) as usize * channels;
        if min.len() != expected || max.len() != expected {
            return Err(RemoteArrayError::corrupt(format!(
                "bins [{}, {}) of {} hold {} and {} values, expected {}",
                start,
                end,
                self.path,
                min.len(),
                max.len(),
                expected
            )));
        }

        Ok(min
            .chunks(channels)
            .zip(max.chunks(channels))
            .map(|(lo, hi)| lo.iter().zip(hi).map(|(l, h)| (h - l) as f32).collect())
            .collect())
    }
}

fn dataset_path(group: &str, name: &str) -> String {
    if group == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", group, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_path() {
        assert_eq!(dataset_path("/", "data_min"), "/data_min");
        assert_eq!(dataset_path("/binned", "data_max"), "/binned/data_max");
    }

    #[test]
    fn test_attr_u64() {
        let attrs = serde_json::json!({"a": 12, "b": 3.0, "c": "x"});
        let attrs = attrs.as_object().unwrap();
        assert_eq!(attr_u64(attrs, "a"), Some(12));
        assert_eq!(attr_u64(attrs, "b"), Some(3));
        assert_eq!(attr_u64(attrs, "c"), None);
        assert_eq!(attr_u64(attrs, "d"), None);
    }
}
