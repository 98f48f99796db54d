//! Reference resolution.
//!
//! [`ReferenceResolver`] turns a store key into bytes, parsed JSON or a
//! decoded chunk. Remote content goes through one [`RequestCache`] keyed by
//! `(key, DecodeMode)`, so concurrent reads of a key share one fetch and
//! later reads are served from memory.

mod json;
mod manifest;

pub use json::{parse_json, repair_non_finite};
pub use manifest::{normalize_key, RefEntry, ReferenceManifest, METADATA_MARKERS};

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::RequestCache;
use crate::codec::ArrayMeta;
use crate::config::ClientConfig;
use crate::error::{RemoteArrayError, Result};
use crate::fetch::RangeFetcher;
use crate::types::{ArrayData, CacheStats};

/// How the cached content of a key was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    Raw,
    Chunk,
}

#[derive(Debug, Clone)]
enum Resolved {
    Raw(Bytes),
    Chunk(Arc<ArrayData>),
}

struct Inner {
    manifest: ReferenceManifest,
    fetcher: Arc<dyn RangeFetcher>,
    cache: RequestCache<(String, DecodeMode), Resolved>,
}

/// Resolves store keys through a [`ReferenceManifest`].
#[derive(Clone)]
pub struct ReferenceResolver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("keys", &self.inner.manifest.len())
            .finish()
    }
}

impl ReferenceResolver {
    pub fn new(
        manifest: ReferenceManifest,
        fetcher: Arc<dyn RangeFetcher>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                manifest,
                fetcher,
                cache: RequestCache::new(config.failure_ttl()),
            }),
        }
    }

    pub fn manifest(&self) -> &ReferenceManifest {
        &self.inner.manifest
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Raw bytes of `key`, `None` if the key does not exist.
    pub async fn read_raw(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Bytes>> {
        let key = normalize_key(key);
        let entry = match self.inner.manifest.locate(key) {
            Some(entry) => entry,
            None => {
                debug!(key, "Key not in manifest");
                return Ok(None);
            }
        };

        if let RefEntry::Inline(bytes) = entry {
            return Ok(Some(bytes));
        }

        let fetcher = self.inner.fetcher.clone();
        let resolved = self
            .inner
            .cache
            .get_or_load(&(key.to_string(), DecodeMode::Raw), cancel, move |token| {
                async move { fetch_entry(fetcher.as_ref(), entry, &token).await }
            })
            .await?;

        match resolved {
            Some(Resolved::Raw(bytes)) => Ok(Some(bytes)),
            Some(Resolved::Chunk(_)) => Err(RemoteArrayError::corrupt(format!(
                "raw cache entry for {} holds decoded data",
                key
            ))),
            None => Ok(None),
        }
    }

    /// Parsed JSON content of `key`.
    pub async fn read_json(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Value>> {
        match self.read_raw(key, cancel).await? {
            Some(bytes) => parse_json(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Array metadata of the array stored under `array_key`.
    pub async fn read_array_meta(
        &self,
        array_key: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<ArrayMeta>> {
        let key = zarray_key(array_key);
        match self.read_json(&key, cancel).await? {
            Some(value) => ArrayMeta::from_value(&value).map(Some),
            None => Ok(None),
        }
    }

    /// Decode the chunk at `key` with the metadata of its nearest ancestor
    /// array.
    pub async fn read_decoded_chunk(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Arc<ArrayData>>> {
        let key = normalize_key(key).to_string();
        if self.inner.manifest.locate(&key).is_none() {
            debug!(key = %key, "Chunk not in manifest");
            return Ok(None);
        }

        let this = self.clone();
        let chunk_key = key.clone();
        let resolved = self
            .inner
            .cache
            .get_or_load(&(key.clone(), DecodeMode::Chunk), cancel, move |token| {
                async move {
                    let Some(bytes) = this.read_raw(&chunk_key, Some(&token)).await? else {
                        return Ok(None);
                    };
                    let meta = this.nearest_array_meta(&chunk_key, &token).await?;
                    let data = meta.decode(&bytes)?;
                    Ok::<_, RemoteArrayError>(Some(Resolved::Chunk(Arc::new(data))))
                }
            })
            .await?;

        match resolved {
            Some(Resolved::Chunk(data)) => Ok(Some(data)),
            Some(Resolved::Raw(_)) => Err(RemoteArrayError::corrupt(format!(
                "chunk cache entry for {} holds raw bytes",
                key
            ))),
            None => Ok(None),
        }
    }

    /// Walk up from a chunk key to the first directory with a `.zarray`.
    async fn nearest_array_meta(
        &self,
        chunk_key: &str,
        cancel: &CancellationToken,
    ) -> Result<ArrayMeta> {
        let mut dir = parent_key(chunk_key);
        loop {
            if let Some(meta) = self.read_array_meta(dir, Some(cancel)).await? {
                return Ok(meta);
            }
            if dir.is_empty() {
                return Err(RemoteArrayError::malformed(format!(
                    "no array metadata above chunk {}",
                    chunk_key
                )));
            }
            dir = parent_key(dir);
        }
    }
}

/// Key of the directory holding `key`, `""` at the root.
pub(crate) fn parent_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(i) => &key[..i],
        None => "",
    }
}

/// Key of a marker document inside the directory `dir`.
pub(crate) fn marker_key(dir: &str, marker: &str) -> String {
    let dir = normalize_key(dir).trim_end_matches('/');
    if dir.is_empty() {
        marker.to_string()
    } else {
        format!("{}/{}", dir, marker)
    }
}

fn zarray_key(array_key: &str) -> String {
    marker_key(array_key, ".zarray")
}

async fn fetch_entry(
    fetcher: &dyn RangeFetcher,
    entry: RefEntry,
    cancel: &CancellationToken,
) -> Result<Option<Resolved>> {
    match entry {
        RefEntry::Inline(bytes) => Ok(Some(Resolved::Raw(bytes))),
        RefEntry::Range {
            url,
            offset,
            length,
        } => {
            if length == 0 {
                return Ok(Some(Resolved::Raw(Bytes::new())));
            }
            let bytes = fetcher
                .fetch_range(&url, offset, offset + length - 1, cancel)
                .await?;
            if (bytes.len() as u64) < length {
                return Err(RemoteArrayError::corrupt(format!(
                    "reference into {} wants {} bytes at {}, got {}",
                    url,
                    length,
                    offset,
                    bytes.len()
                )));
            }
            Ok(Some(Resolved::Raw(bytes)))
        }
        RefEntry::Object { url } => Ok(fetcher
            .fetch_object(&url, cancel)
            .await?
            .map(Resolved::Raw)),
    }
}
