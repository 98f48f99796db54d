//! Per-array metadata record (`.zarray`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteArrayError, Result};
use crate::types::{ArrayData, Attributes, ByteOrder, DType, DatasetDescriptor};

use super::{decode_chunk, CodecSpec};

/// Array metadata: shape, chunking, element type and codecs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: String,
    #[serde(default)]
    pub compressor: Option<CodecSpec>,
    #[serde(default)]
    pub filters: Option<Vec<CodecSpec>>,
    #[serde(default)]
    pub fill_value: Value,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub dimension_separator: Option<String>,
}

fn default_order() -> String {
    "C".to_string()
}

impl ArrayMeta {
    /// Parse and check a `.zarray` document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let meta: ArrayMeta = serde_json::from_value(value.clone())?;
        meta.validate()?;
        Ok(meta)
    }

    fn validate(&self) -> Result<()> {
        if self.order != "C" {
            return Err(RemoteArrayError::malformed(format!(
                "array order {:?} is not supported, only C order",
                self.order
            )));
        }
        if self.chunks.len() != self.shape.len() {
            return Err(RemoteArrayError::malformed(format!(
                "chunks {:?} do not match shape {:?}",
                self.chunks, self.shape
            )));
        }
        if self.chunks.iter().any(|&c| c == 0) {
            return Err(RemoteArrayError::malformed("chunk dimensions must be > 0"));
        }
        self.element_type()?;
        Ok(())
    }

    /// Element type and byte order.
    pub fn element_type(&self) -> Result<(DType, ByteOrder)> {
        DType::parse(&self.dtype)
            .ok_or_else(|| RemoteArrayError::malformed(format!("unknown dtype {:?}", self.dtype)))
    }

    pub fn filters(&self) -> &[CodecSpec] {
        self.filters.as_deref().unwrap_or(&[])
    }

    /// Numeric fill value for missing chunks. `null` fills with zero;
    /// non-finite values arrive as the strings `"NaN"`, `"Infinity"` and
    /// `"-Infinity"`.
    pub fn fill_value(&self) -> f64 {
        match &self.fill_value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::String(s) => match s.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().unwrap_or(0.0),
            },
            _ => 0.0,
        }
    }

    /// Store key of the chunk at grid index `idx`, relative to the array.
    pub fn chunk_key(&self, idx: &[u64]) -> String {
        if idx.is_empty() {
            return "0".to_string();
        }
        let separator = self.dimension_separator.as_deref().unwrap_or(".");
        idx.iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Decode one chunk of this array.
    pub fn decode(&self, data: &[u8]) -> Result<ArrayData> {
        let (dtype, order) = self.element_type()?;
        decode_chunk(
            data,
            dtype,
            order,
            self.compressor.as_ref(),
            self.filters(),
            &self.chunks,
        )
    }

    pub fn descriptor(&self, path: &str, attrs: Attributes) -> Result<DatasetDescriptor> {
        let (dtype, _) = self.element_type()?;
        Ok(DatasetDescriptor {
            path: path.to_string(),
            shape: self.shape.clone(),
            dtype,
            attrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(extra: Value) -> Value {
        let mut base = json!({
            "zarr_format": 2,
            "shape": [10, 4],
            "chunks": [5, 4],
            "dtype": "<f4",
            "compressor": null,
            "filters": null,
            "fill_value": 0.0,
            "order": "C"
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
            base.extend(extra);
        }
        base
    }

    #[test]
    fn test_parse_and_descriptor() {
        let m = ArrayMeta::from_value(&meta(json!({}))).unwrap();
        assert_eq!(m.element_type().unwrap(), (DType::Float32, ByteOrder::Little));
        let desc = m.descriptor("/acq/data", Attributes::new()).unwrap();
        assert_eq!(desc.shape, vec![10, 4]);
        assert_eq!(desc.dtype, DType::Float32);
    }

    #[test]
    fn test_rejects_fortran_order_and_bad_chunks() {
        assert!(ArrayMeta::from_value(&meta(json!({"order": "F"}))).is_err());
        assert!(ArrayMeta::from_value(&meta(json!({"chunks": [5]}))).is_err());
        assert!(ArrayMeta::from_value(&meta(json!({"dtype": "<c8"}))).is_err());
        assert!(ArrayMeta::from_value(&json!({"shape": [1]})).is_err());
    }

    #[test]
    fn test_fill_values() {
        let m = ArrayMeta::from_value(&meta(json!({"fill_value": "NaN"}))).unwrap();
        assert!(m.fill_value().is_nan());
        let m = ArrayMeta::from_value(&meta(json!({"fill_value": null}))).unwrap();
        assert_eq!(m.fill_value(), 0.0);
        let m = ArrayMeta::from_value(&meta(json!({"fill_value": -1}))).unwrap();
        assert_eq!(m.fill_value(), -1.0);
    }

    #[test]
    fn test_chunk_keys() {
        let m = ArrayMeta::from_value(&meta(json!({}))).unwrap();
        assert_eq!(m.chunk_key(&[1, 0]), "1.0");
        let m = ArrayMeta::from_value(&meta(json!({"dimension_separator": "/"}))).unwrap();
        assert_eq!(m.chunk_key(&[1, 0]), "1/0");
        assert_eq!(m.chunk_key(&[]), "0");
    }
}
