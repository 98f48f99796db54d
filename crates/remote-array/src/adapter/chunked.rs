//! Hierarchy loading and chunk assembly for chunked array stores.
//!
//! Used by the consolidated store and both reference filesystem adapters:
//! they differ in where the manifest comes from and how many slice
//! dimensions they allow, not in how chunks are read.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::ArrayMeta;
use crate::error::{RemoteArrayError, Result};
use crate::resolver::{marker_key, parent_key, ReferenceResolver, METADATA_MARKERS};
use crate::slice::{check_slice_dims, Selection};
use crate::types::{
    ArrayData, Attributes, CacheStats, DType, DatasetDescriptor, GroupDescriptor, ReadOptions,
};

use super::hierarchy::{normalize_path, path_to_key, Hierarchy};
use super::linked::EXTERNAL_MARKER;

/// A chunked store whose metadata has been loaded.
#[derive(Debug)]
pub struct ChunkedStore {
    resolver: ReferenceResolver,
    hierarchy: Hierarchy,
    arrays: HashMap<String, Arc<ArrayMeta>>,
}

/// Attributes document of the directory `dir`, empty when there is none.
async fn read_attrs(
    resolver: &ReferenceResolver,
    dir: &str,
    cancel: Option<&CancellationToken>,
) -> Result<Attributes> {
    match resolver.read_json(&marker_key(dir, ".zattrs"), cancel).await? {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Null) | None => Ok(Attributes::new()),
        Some(other) => Err(RemoteArrayError::malformed(format!(
            "attributes of {:?} are not an object: {}",
            dir, other
        ))),
    }
}

impl ChunkedStore {
    /// Index every group and array named by a marker key in the manifest.
    pub async fn load(resolver: ReferenceResolver) -> Result<Self> {
        let mut group_dirs = BTreeSet::new();
        let mut array_dirs = BTreeSet::new();
        let mut linked_dirs = BTreeSet::new();
        for key in resolver.manifest().keys() {
            let leaf = key.rsplit('/').next().unwrap_or(key);
            if leaf == EXTERNAL_MARKER {
                linked_dirs.insert(parent_key(key).to_string());
            }
            if !METADATA_MARKERS.contains(&leaf) {
                continue;
            }
            let dir = parent_key(key).to_string();
            match leaf {
                ".zarray" => {
                    array_dirs.insert(dir);
                }
                _ => {
                    group_dirs.insert(dir);
                }
            }
        }
        // A `.zattrs` next to a `.zarray` or a link marker belongs to the
        // dataset, not to a group.
        group_dirs.retain(|d| !array_dirs.contains(d) && !linked_dirs.contains(d));

        let groups = try_join_all(group_dirs.iter().map(|dir| {
            let resolver = &resolver;
            async move { Ok::<_, RemoteArrayError>((dir, read_attrs(resolver, dir, None).await?)) }
        }))
        .await?;

        let arrays = try_join_all(array_dirs.iter().map(|dir| {
            let resolver = &resolver;
            async move {
                let meta = resolver.read_array_meta(dir, None).await?.ok_or_else(|| {
                    RemoteArrayError::malformed(format!("array {:?} lost its .zarray", dir))
                })?;
                let attrs = read_attrs(resolver, dir, None).await?;
                Ok::<_, RemoteArrayError>((dir, meta, attrs))
            }
        }))
        .await?;

        let mut hierarchy = Hierarchy::new();
        for (dir, attrs) in groups {
            hierarchy.insert_group(dir, attrs);
        }
        let mut metas = HashMap::with_capacity(arrays.len());
        for (dir, meta, attrs) in arrays {
            let path = normalize_path(dir);
            hierarchy.insert_dataset(meta.descriptor(&path, attrs)?);
            metas.insert(path, Arc::new(meta));
        }

        debug!(
            groups = hierarchy.num_groups(),
            datasets = hierarchy.num_datasets(),
            "Indexed chunked store"
        );

        Ok(Self {
            resolver,
            hierarchy,
            arrays: metas,
        })
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn get_group(&self, path: &str) -> Option<GroupDescriptor> {
        self.hierarchy.get_group(path)
    }

    pub fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        self.hierarchy.get_dataset(path).cloned()
    }

    pub fn array_meta(&self, path: &str) -> Option<&Arc<ArrayMeta>> {
        self.arrays.get(&normalize_path(path))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache_stats()
    }

    /// Read a selection of `path`, assembling it from every chunk it touches.
    /// Missing chunks take the fill value.
    pub async fn read(
        &self,
        path: &str,
        options: &ReadOptions,
        max_dims: usize,
    ) -> Result<Option<ArrayData>> {
        check_slice_dims(options.slice_dims(), max_dims)?;

        let path = normalize_path(path);
        let (Some(desc), Some(meta)) = (self.hierarchy.get_dataset(&path), self.arrays.get(&path))
        else {
            debug!(path = %path, "Dataset not found");
            return Ok(None);
        };
        let selection = Selection::resolve(&desc.shape, options.slice.as_deref(), max_dims)?;
        let len = selection.num_elements() as usize;

        let mut out = match desc.dtype {
            DType::Object => None,
            dtype => Some(ArrayData::filled(dtype, len, meta.fill_value())?),
        };
        if len == 0 {
            return Ok(Some(out.unwrap_or(ArrayData::Json(Vec::new()))));
        }

        let indices = selection.chunk_indices(&meta.chunks);
        let cancel = options.cancel.as_ref();
        let array_key = path_to_key(&path);
        let chunks = try_join_all(indices.iter().map(|idx| {
            let key = marker_key(array_key, &meta.chunk_key(idx));
            async move { self.resolver.read_decoded_chunk(&key, cancel).await }
        }))
        .await?;

        for (idx, chunk) in indices.iter().zip(chunks) {
            let Some(chunk) = chunk else {
                debug!(path = %path, chunk = ?idx, "Chunk missing, using fill value");
                continue;
            };
            let origin: Vec<u64> = idx.iter().zip(&meta.chunks).map(|(i, c)| i * c).collect();
            let buffer = out.get_or_insert_with(|| chunk.default_like(len));
            buffer.copy_overlap_from(&chunk, &selection, &origin, &meta.chunks)?;
        }

        // An object array with no stored chunks reads as nulls.
        Ok(Some(out.unwrap_or_else(|| ArrayData::Json(vec![Value::Null; len]))))
    }

    /// Decode only the first chunk of an object array and keep rows
    /// `start..end` of the first dimension.
    pub async fn read_first_chunk(
        &self,
        path: &str,
        options: &ReadOptions,
        max_dims: usize,
    ) -> Result<Option<ArrayData>> {
        check_slice_dims(options.slice_dims(), max_dims)?;

        let path = normalize_path(path);
        let (Some(desc), Some(meta)) = (self.hierarchy.get_dataset(&path), self.arrays.get(&path))
        else {
            return Ok(None);
        };
        let selection = Selection::resolve(&desc.shape, options.slice.as_deref(), max_dims)?;

        let first = vec![0u64; meta.chunks.len()];
        let key = marker_key(path_to_key(&path), &meta.chunk_key(&first));
        let Some(chunk) = self
            .resolver
            .read_decoded_chunk(&key, options.cancel.as_ref())
            .await?
        else {
            return Ok(Some(ArrayData::Json(Vec::new())));
        };

        let data = chunk.as_ref().clone();
        match (selection.start.first(), selection.shape.first()) {
            (Some(&start), Some(&rows)) => {
                let row_len: u64 = desc.shape.iter().skip(1).product();
                Ok(Some(data.slice_rows(
                    start as usize,
                    (start + rows) as usize,
                    row_len as usize,
                )))
            }
            _ => Ok(Some(data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::config::ClientConfig;
    use crate::fetch::MemoryRangeFetcher;
    use crate::resolver::ReferenceManifest;

    const FILE: &str = "mem://store.bin";

    fn i16_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// A 3x4 int16 array chunked 2x2, value = r*10 + c. Chunk (1,1) is
    /// absent and reads as the fill value.
    async fn store() -> (ChunkedStore, Arc<MemoryRangeFetcher>) {
        let mut file = Vec::new();
        let mut refs = serde_json::Map::new();
        for (cr, cc) in [(0u64, 0u64), (0, 1), (1, 0)] {
            let mut chunk = Vec::new();
            for r in 0..2 {
                for c in 0..2 {
                    chunk.push(((cr * 2 + r) * 10 + cc * 2 + c) as i16);
                }
            }
            let bytes = i16_bytes(&chunk);
            refs.insert(
                format!("acq/grid/{}.{}", cr, cc),
                json!([FILE, file.len(), bytes.len()]),
            );
            file.extend(bytes);
        }
        refs.insert(".zgroup".into(), json!({"zarr_format": 2}));
        refs.insert("acq/.zgroup".into(), json!({"zarr_format": 2}));
        refs.insert("acq/.zattrs".into(), json!({"session": "s1"}));
        refs.insert(
            "acq/grid/.zarray".into(),
            json!({
                "shape": [3, 4], "chunks": [2, 2], "dtype": "<i2",
                "compressor": null, "filters": null, "fill_value": -1, "order": "C"
            }),
        );
        refs.insert("acq/grid/.zattrs".into(), json!({"units": "uV"}));

        let fetcher = Arc::new(MemoryRangeFetcher::new());
        fetcher.insert(FILE, file);
        let manifest =
            ReferenceManifest::from_refs_document(&json!({"version": 1, "refs": refs})).unwrap();
        let resolver = ReferenceResolver::new(manifest, fetcher.clone(), &ClientConfig::default());
        (ChunkedStore::load(resolver).await.unwrap(), fetcher)
    }

    #[tokio::test]
    async fn test_hierarchy_from_markers() {
        let (store, _) = store().await;
        let root = store.get_group("/").unwrap();
        assert_eq!(root.subgroups[0].path, "/acq");
        assert_eq!(root.subgroups[0].attrs.get("session"), Some(&json!("s1")));

        let acq = store.get_group("/acq").unwrap();
        assert!(acq.subgroups.is_empty());
        assert_eq!(acq.datasets[0].name, "grid");
        assert_eq!(acq.datasets[0].shape, vec![3, 4]);
        assert_eq!(acq.datasets[0].attrs.get("units"), Some(&json!("uV")));
        assert!(store.get_group("/acq/grid").is_none());
    }

    #[tokio::test]
    async fn test_full_read_with_fill() {
        let (store, _) = store().await;
        let data = store
            .read("/acq/grid", &ReadOptions::new(), 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            data,
            ArrayData::Int16(vec![0, 1, 2, 3, 10, 11, 12, 13, 20, 21, -1, -1])
        );
    }

    #[tokio::test]
    async fn test_sliced_read_touches_only_needed_chunks() {
        let (store, fetcher) = store().await;
        let options = ReadOptions::new().with_slice(vec![(1, 2), (1, 3)]);
        let data = store.read("/acq/grid", &options, 2).await.unwrap().unwrap();
        assert_eq!(data, ArrayData::Int16(vec![11, 12]));
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn test_slice_limits_checked_before_io() {
        let (store, fetcher) = store().await;
        let options = ReadOptions::new().with_slice(vec![(0, 1), (0, 1), (0, 1)]);
        let err = store.read("/acq/grid", &options, 2).await.unwrap_err();
        assert_eq!(
            err,
            RemoteArrayError::UnsupportedSlice {
                requested: 3,
                supported: 2
            }
        );

        let options = ReadOptions::new().with_slice(vec![(2, 5)]);
        let err = store.read("/acq/grid", &options, 2).await.unwrap_err();
        assert!(matches!(err, RemoteArrayError::InvalidSlice(_)));
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let (store, _) = store().await;
        assert_eq!(
            store.read("/acq/none", &ReadOptions::new(), 2).await.unwrap(),
            None
        );
    }
}
