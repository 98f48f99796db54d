//! Common fixtures for remote array tests.
//!
//! Reference manifests, array metadata and well-known URLs that describe
//! small recordings in the shapes the readers meet in practice.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

/// URLs used by the in-memory fixtures.
pub mod urls {
    pub const NH5: &str = "mem://recording.nh5";
    pub const REFS: &str = "mem://recording.nwb.json";
    pub const LINKED_REFS: &str = "mem://recording.nwb.lindi.json";
    pub const ZARR: &str = "mem://recording.zarr";
    pub const BLOB: &str = "mem://blobs/recording.h5";
}

/// `.zarray` metadata for an uncompressed C-order array.
pub fn zarray(shape: &[u64], chunks: &[u64], dtype: &str, fill_value: Value) -> Value {
    json!({
        "zarr_format": 2,
        "shape": shape,
        "chunks": chunks,
        "dtype": dtype,
        "compressor": null,
        "filters": null,
        "fill_value": fill_value,
        "order": "C",
    })
}

/// `.zarray` metadata for a single-chunk object array with one filter.
pub fn object_zarray(len: u64, filter: &str) -> Value {
    json!({
        "zarr_format": 2,
        "shape": [len],
        "chunks": [len],
        "dtype": "|O",
        "compressor": null,
        "filters": [{"id": filter}],
        "fill_value": null,
        "order": "C",
    })
}

/// Builder for `{version, refs}` reference manifests.
///
/// # Example
///
/// ```
/// use test_utils::{zarray, RefsBuilder};
///
/// let doc = RefsBuilder::new()
///     .group("", serde_json::json!({"session": "a"}))
///     .array("x", zarray(&[4], &[4], "<f4", 0.into()), None)
///     .range("x/0", "mem://blob", 0, 16)
///     .build();
/// assert_eq!(doc["version"], 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct RefsBuilder {
    refs: Map<String, Value>,
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

impl RefsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group at store directory `dir` (empty for the root).
    pub fn group(mut self, dir: &str, attrs: Value) -> Self {
        self.refs
            .insert(join(dir, ".zgroup"), json!({"zarr_format": 2}));
        if attrs.as_object().map_or(false, |a| !a.is_empty()) {
            self.refs.insert(join(dir, ".zattrs"), attrs);
        }
        self
    }

    /// An array at `dir` with the given `.zarray` document.
    pub fn array(mut self, dir: &str, zarray: Value, attrs: Option<Value>) -> Self {
        self.refs.insert(join(dir, ".zarray"), zarray);
        if let Some(attrs) = attrs {
            self.refs.insert(join(dir, ".zattrs"), attrs);
        }
        self
    }

    /// A key whose value is a byte range of another object.
    pub fn range(mut self, key: &str, url: &str, offset: u64, length: u64) -> Self {
        self.refs
            .insert(key.to_string(), json!([url, offset, length]));
        self
    }

    /// A key whose value is a whole object.
    pub fn object(mut self, key: &str, url: &str) -> Self {
        self.refs.insert(key.to_string(), json!([url]));
        self
    }

    /// A key whose value is stored inline as base64.
    pub fn inline(mut self, key: &str, bytes: &[u8]) -> Self {
        self.refs.insert(
            key.to_string(),
            Value::String(format!("base64:{}", STANDARD.encode(bytes))),
        );
        self
    }

    /// A raw reference value, for anything the other methods cannot express.
    pub fn raw(mut self, key: &str, value: Value) -> Self {
        self.refs.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Value {
        json!({"version": 1, "refs": Value::Object(self.refs)})
    }

    /// The manifest as consolidated `.zmetadata`, keeping only metadata keys.
    pub fn build_consolidated(self) -> Value {
        let metadata: Map<String, Value> = self
            .refs
            .into_iter()
            .filter(|(k, _)| {
                k.ends_with(".zgroup") || k.ends_with(".zarray") || k.ends_with(".zattrs")
            })
            .collect();
        json!({"zarr_consolidated_format": 1, "metadata": Value::Object(metadata)})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_builder_keys() {
        let doc = RefsBuilder::new()
            .group("", json!({}))
            .group("acquisition", json!({"neurodata_type": "Group"}))
            .array("acquisition/x", zarray(&[2], &[2], "<i2", json!(0)), None)
            .inline("acquisition/x/0", &[1, 0, 2, 0])
            .build();

        let refs = doc["refs"].as_object().unwrap();
        assert!(refs.contains_key(".zgroup"));
        assert!(!refs.contains_key(".zattrs"));
        assert!(refs.contains_key("acquisition/.zattrs"));
        assert_eq!(refs["acquisition/x/0"], json!("base64:AQACAA=="));
    }

    #[test]
    fn test_consolidated_drops_chunks() {
        let doc = RefsBuilder::new()
            .group("", json!({}))
            .array("x", zarray(&[2], &[2], "<i2", json!(0)), None)
            .range("x/0", urls::BLOB, 0, 4)
            .build_consolidated();
        let metadata = doc["metadata"].as_object().unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(!metadata.contains_key("x/0"));
    }
}
