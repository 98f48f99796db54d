//! Chunk decoding.
//!
//! A chunk goes through its compressor first, then either numeric
//! reinterpretation or, for object arrays, its single filter.

mod compressor;
mod filters;
mod meta;
mod numeric;

pub use compressor::decompress;
pub use filters::{decode_json2, decode_object, decode_vlen_bytes, decode_vlen_utf8};
pub use meta::ArrayMeta;
pub use numeric::decode_numeric;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteArrayError, Result};
use crate::types::{ArrayData, ByteOrder, DType};

/// A compressor or filter entry of array metadata, e.g.
/// `{"id": "zlib", "level": 4}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecSpec {
    pub id: String,
    #[serde(flatten)]
    pub config: serde_json::Map<String, Value>,
}

impl CodecSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: serde_json::Map::new(),
        }
    }
}

/// Decode one chunk into typed values.
pub fn decode_chunk(
    data: &[u8],
    dtype: DType,
    order: ByteOrder,
    compressor: Option<&CodecSpec>,
    filters: &[CodecSpec],
    chunk_shape: &[u64],
) -> Result<ArrayData> {
    let raw = decompress(compressor, data)?;
    let expected: u64 = chunk_shape.iter().product();

    if dtype == DType::Object {
        let decoded = decode_object(filters, &raw)?;
        if decoded.len() as u64 != expected {
            return Err(RemoteArrayError::corrupt(format!(
                "object chunk holds {} elements, expected {} for chunk shape {:?}",
                decoded.len(),
                expected,
                chunk_shape
            )));
        }
        return Ok(decoded);
    }
    if !filters.is_empty() {
        let ids: Vec<&str> = filters.iter().map(|f| f.id.as_str()).collect();
        return Err(RemoteArrayError::UnsupportedFilter(format!(
            "{} on {} data",
            ids.join(","),
            dtype
        )));
    }

    decode_numeric(&raw, dtype, order, expected as usize)
}
