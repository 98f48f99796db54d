//! Reference manifests: logical store keys mapped to bytes or byte ranges.

use std::collections::HashMap;

use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{RemoteArrayError, Result};
use crate::fetch::join_url;

/// Where the content of one key lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefEntry {
    /// Content stored in the manifest itself.
    Inline(Bytes),
    /// `length` bytes of `url` starting at `offset`.
    Range { url: String, offset: u64, length: u64 },
    /// The whole object at `url`.
    Object { url: String },
}

/// Suffixes of the keys that carry metadata rather than chunk data.
pub const METADATA_MARKERS: [&str; 3] = [".zgroup", ".zarray", ".zattrs"];

fn is_metadata_key(key: &str) -> bool {
    let leaf = key.rsplit('/').next().unwrap_or(key);
    leaf.starts_with('.')
}

/// A key to entry map, optionally backed by an object store for keys the map
/// does not hold.
#[derive(Debug, Clone, Default)]
pub struct ReferenceManifest {
    refs: HashMap<String, RefEntry>,
    /// Base URL of a store whose chunk objects are addressed by key.
    store_base: Option<String>,
}

impl ReferenceManifest {
    /// Parse a `{version, refs, templates?}` reference filesystem document.
    pub fn from_refs_document(doc: &Value) -> Result<Self> {
        let refs = doc
            .get("refs")
            .and_then(Value::as_object)
            .ok_or_else(|| RemoteArrayError::malformed("manifest has no refs object"))?;

        let templates: HashMap<String, String> = match doc.get("templates") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => HashMap::new(),
        };

        let mut out = HashMap::with_capacity(refs.len());
        for (key, value) in refs {
            let entry = parse_entry(key, value, &templates)?;
            out.insert(normalize_key(key).to_string(), entry);
        }

        Ok(Self {
            refs: out,
            store_base: None,
        })
    }

    /// Build a manifest for a store with consolidated metadata. Metadata keys
    /// are served from the `.zmetadata` document; every other key maps to an
    /// object under `base_url`.
    pub fn from_consolidated(base_url: &str, doc: &Value) -> Result<Self> {
        let metadata = doc
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| RemoteArrayError::malformed(".zmetadata has no metadata object"))?;

        let mut refs = HashMap::with_capacity(metadata.len());
        for (key, value) in metadata {
            let bytes = serde_json::to_vec(value)?;
            refs.insert(
                normalize_key(key).to_string(),
                RefEntry::Inline(Bytes::from(bytes)),
            );
        }

        Ok(Self {
            refs,
            store_base: Some(base_url.to_string()),
        })
    }

    /// Locate the content of `key`.
    pub fn locate(&self, key: &str) -> Option<RefEntry> {
        let key = normalize_key(key);
        if let Some(entry) = self.refs.get(key) {
            return Some(entry.clone());
        }
        match &self.store_base {
            // Consolidated metadata is complete, so an unknown metadata key
            // is missing rather than remote.
            Some(base) if !is_metadata_key(key) => Some(RefEntry::Object {
                url: join_url(base, key),
            }),
            _ => None,
        }
    }

    /// Every key held by the manifest.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.refs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Strip leading slashes from a store key.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn expand_templates(url: &str, templates: &HashMap<String, String>) -> String {
    if templates.is_empty() || !url.contains("{{") {
        return url.to_string();
    }
    let mut out = url.to_string();
    for (name, value) in templates {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

fn parse_entry(key: &str, value: &Value, templates: &HashMap<String, String>) -> Result<RefEntry> {
    match value {
        Value::String(s) => match s.strip_prefix("base64:") {
            Some(encoded) => {
                let decoded = base64::engine::general_purpose::STANDARD.decode(encoded)?;
                Ok(RefEntry::Inline(Bytes::from(decoded)))
            }
            None => Ok(RefEntry::Inline(Bytes::from(s.clone().into_bytes()))),
        },
        Value::Array(parts) => {
            let url = parts
                .first()
                .and_then(Value::as_str)
                .map(|u| expand_templates(u, templates))
                .ok_or_else(|| {
                    RemoteArrayError::malformed(format!("reference {} has no URL", key))
                })?;
            match parts.len() {
                1 => Ok(RefEntry::Object { url }),
                3 => {
                    let offset = parts[1].as_u64();
                    let length = parts[2].as_u64();
                    match (offset, length) {
                        (Some(offset), Some(length)) => Ok(RefEntry::Range {
                            url,
                            offset,
                            length,
                        }),
                        _ => Err(RemoteArrayError::malformed(format!(
                            "reference {} has a non-integer offset or length",
                            key
                        ))),
                    }
                }
                n => Err(RemoteArrayError::malformed(format!(
                    "reference {} has {} elements, expected 1 or 3",
                    key, n
                ))),
            }
        }
        // Inline JSON documents such as `.zattrs` objects.
        other => Ok(RefEntry::Inline(Bytes::from(serde_json::to_vec(other)?))),
    }
}
