//! Core types shared by every adapter.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteArrayError, Result};
use crate::slice::Selection;

/// Attribute map of a group or dataset.
///
/// Metadata may spell non-finite numbers as bare `NaN`, `Infinity` or
/// `-Infinity`, which JSON cannot hold. Such values appear here as the
/// strings `"NaN"`, `"Infinity"` and `"-Infinity"`; a string attribute with
/// one of those exact spellings reads the same way.
pub type Attributes = serde_json::Map<String, Value>;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Variable-size values that need a filter to decode.
    Object,
}

/// Byte order of stored numeric elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl DType {
    /// Parse a canonical name (`float32`) or a NumPy type string (`<f4`).
    pub fn parse(s: &str) -> Option<(DType, ByteOrder)> {
        let canonical = match s {
            "int8" => Some(DType::Int8),
            "uint8" => Some(DType::UInt8),
            "int16" => Some(DType::Int16),
            "uint16" => Some(DType::UInt16),
            "int32" => Some(DType::Int32),
            "uint32" => Some(DType::UInt32),
            "int64" => Some(DType::Int64),
            "uint64" => Some(DType::UInt64),
            "float32" => Some(DType::Float32),
            "float64" => Some(DType::Float64),
            "object" => Some(DType::Object),
            _ => None,
        };
        if let Some(dtype) = canonical {
            return Some((dtype, ByteOrder::Little));
        }

        let (order, code) = match s.as_bytes().first()? {
            b'<' | b'|' | b'=' => (ByteOrder::Little, &s[1..]),
            b'>' => (ByteOrder::Big, &s[1..]),
            _ => (ByteOrder::Little, s),
        };
        let dtype = match code {
            "i1" => DType::Int8,
            "u1" | "b1" => DType::UInt8,
            "i2" => DType::Int16,
            "u2" => DType::UInt16,
            "i4" => DType::Int32,
            "u4" => DType::UInt32,
            "i8" => DType::Int64,
            "u8" => DType::UInt64,
            "f4" => DType::Float32,
            "f8" => DType::Float64,
            "O" => DType::Object,
            _ => return None,
        };
        Some((dtype, order))
    }

    /// Size of one element in bytes, `None` for object.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            DType::Int8 | DType::UInt8 => Some(1),
            DType::Int16 | DType::UInt16 => Some(2),
            DType::Int32 | DType::UInt32 | DType::Float32 => Some(4),
            DType::Int64 | DType::UInt64 | DType::Float64 => Some(8),
            DType::Object => None,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::UInt16 => "uint16",
            DType::Int32 => "int32",
            DType::UInt32 => "uint32",
            DType::Int64 => "int64",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Object => "object",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subgroup listed in its parent's descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupEntry {
    pub name: String,
    pub path: String,
    pub attrs: Attributes,
}

/// A dataset listed in its parent's descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: DType,
    pub attrs: Attributes,
}

/// A group and its direct children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub path: String,
    pub attrs: Attributes,
    pub subgroups: Vec<SubgroupEntry>,
    pub datasets: Vec<DatasetEntry>,
}

/// Shape, element type and attributes of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: DType,
    pub attrs: Attributes,
}

impl DatasetDescriptor {
    /// Total number of elements (1 for a scalar).
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    pub(crate) fn as_entry(&self, name: &str) -> DatasetEntry {
        DatasetEntry {
            name: name.to_string(),
            path: self.path.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            attrs: self.attrs.clone(),
        }
    }
}

/// Options for a dataset read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// `(start, end)` pairs for the leading dimensions; trailing dimensions
    /// are read in full.
    pub slice: Option<Vec<(u64, u64)>>,
    /// Cancels only this caller's wait.
    pub cancel: Option<CancellationToken>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slice(mut self, slice: Vec<(u64, u64)>) -> Self {
        self.slice = Some(slice);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn slice_dims(&self) -> usize {
        self.slice.as_ref().map_or(0, Vec::len)
    }
}

/// Decoded array contents.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Bytes(Vec<Bytes>),
    Json(Vec<Value>),
}

/// Applies `$body` to the vector held by any variant.
macro_rules! with_values {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Int8($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Utf8($v) => $body,
            ArrayData::Bytes($v) => $body,
            ArrayData::Json($v) => $body,
        }
    };
}

impl ArrayData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the element type held.
    pub fn kind(&self) -> &'static str {
        match self {
            ArrayData::Int8(_) => "int8",
            ArrayData::UInt8(_) => "uint8",
            ArrayData::Int16(_) => "int16",
            ArrayData::UInt16(_) => "uint16",
            ArrayData::Int32(_) => "int32",
            ArrayData::UInt32(_) => "uint32",
            ArrayData::Int64(_) => "int64",
            ArrayData::UInt64(_) => "uint64",
            ArrayData::Float32(_) => "float32",
            ArrayData::Float64(_) => "float64",
            ArrayData::Utf8(_) => "utf8",
            ArrayData::Bytes(_) => "bytes",
            ArrayData::Json(_) => "json",
        }
    }

    /// A numeric array of `len` elements set to `fill` (cast to the dtype).
    pub fn filled(dtype: DType, len: usize, fill: f64) -> Result<Self> {
        Ok(match dtype {
            DType::Int8 => ArrayData::Int8(vec![fill as i8; len]),
            DType::UInt8 => ArrayData::UInt8(vec![fill as u8; len]),
            DType::Int16 => ArrayData::Int16(vec![fill as i16; len]),
            DType::UInt16 => ArrayData::UInt16(vec![fill as u16; len]),
            DType::Int32 => ArrayData::Int32(vec![fill as i32; len]),
            DType::UInt32 => ArrayData::UInt32(vec![fill as u32; len]),
            DType::Int64 => ArrayData::Int64(vec![fill as i64; len]),
            DType::UInt64 => ArrayData::UInt64(vec![fill as u64; len]),
            DType::Float32 => ArrayData::Float32(vec![fill as f32; len]),
            DType::Float64 => ArrayData::Float64(vec![fill; len]),
            DType::Object => {
                return Err(RemoteArrayError::malformed(
                    "object arrays have no numeric fill value",
                ))
            }
        })
    }

    /// Copy the part of `chunk` that overlaps `selection` into `self`,
    /// which holds the whole selection in row-major order.
    pub(crate) fn copy_overlap_from(
        &mut self,
        chunk: &ArrayData,
        selection: &Selection,
        chunk_origin: &[u64],
        chunk_shape: &[u64],
    ) -> Result<()> {
        macro_rules! copy {
            ($($variant:ident),*) => {
                match (self, chunk) {
                    $(
                        (ArrayData::$variant(out), ArrayData::$variant(src)) => {
                            selection.copy_overlap(out, src, chunk_origin, chunk_shape)
                        }
                    )*
                    (out, src) => Err(RemoteArrayError::corrupt(format!(
                        "chunk decoded as {} but array holds {}",
                        src.kind(),
                        out.kind()
                    ))),
                }
            };
        }
        copy!(Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64, Float32, Float64, Utf8, Bytes, Json)
    }

    /// `len` default elements (zero, empty or null) of the same kind.
    pub(crate) fn default_like(&self, len: usize) -> Self {
        macro_rules! defaults {
            ($($variant:ident),*) => {
                match self {
                    $( ArrayData::$variant(_) => ArrayData::$variant(vec![Default::default(); len]), )*
                }
            };
        }
        defaults!(Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64, Float32, Float64, Utf8, Bytes, Json)
    }

    /// Keep rows `start..end` where each row holds `row_len` elements.
    pub(crate) fn slice_rows(self, start: usize, end: usize, row_len: usize) -> Self {
        let to = (end * row_len).min(self.len());
        let from = (start * row_len).min(to);
        with_values_owned(self, from, to)
    }

    /// Values widened to f64, `None` for non-numeric data.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        Some(match self {
            ArrayData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float64(v) => v.clone(),
            ArrayData::Utf8(_) | ArrayData::Bytes(_) | ArrayData::Json(_) => return None,
        })
    }

    /// JSON rendering of the values. Non-finite floats become `null` and byte
    /// strings become arrays of numbers.
    pub fn to_json(&self) -> Value {
        match self {
            ArrayData::Utf8(v) => Value::from(v.clone()),
            ArrayData::Bytes(v) => Value::Array(
                v.iter()
                    .map(|b| Value::from(b.to_vec()))
                    .collect(),
            ),
            ArrayData::Json(v) => Value::Array(v.clone()),
            ArrayData::Int64(v) => Value::from(v.clone()),
            ArrayData::UInt64(v) => Value::from(v.clone()),
            other => Value::Array(
                other
                    .to_f64_vec()
                    .unwrap_or_default()
                    .into_iter()
                    .map(Value::from)
                    .collect(),
            ),
        }
    }
}

fn with_values_owned(data: ArrayData, from: usize, to: usize) -> ArrayData {
    macro_rules! take {
        ($($variant:ident),*) => {
            match data {
                $( ArrayData::$variant(mut v) => {
                    v.truncate(to);
                    ArrayData::$variant(v.split_off(from))
                } )*
            }
        };
    }
    take!(Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64, Float32, Float64, Utf8, Bytes, Json)
}

/// Hit/miss counters of a request cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined an in-flight fetch instead of starting one.
    pub coalesced: u64,
    pub entries: usize,
    /// Fetches that ended in a transient failure.
    pub failures: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_parse_canonical_and_numpy() {
        assert_eq!(
            DType::parse("float32"),
            Some((DType::Float32, ByteOrder::Little))
        );
        assert_eq!(DType::parse("<f4"), Some((DType::Float32, ByteOrder::Little)));
        assert_eq!(DType::parse(">i2"), Some((DType::Int16, ByteOrder::Big)));
        assert_eq!(DType::parse("|u1"), Some((DType::UInt8, ByteOrder::Little)));
        assert_eq!(DType::parse("|O"), Some((DType::Object, ByteOrder::Little)));
        assert_eq!(DType::parse("<i8"), Some((DType::Int64, ByteOrder::Little)));
        assert_eq!(DType::parse("<c16"), None);
        assert_eq!(DType::parse(""), None);
    }

    #[test]
    fn test_dtype_serde_names() {
        assert_eq!(serde_json::to_string(&DType::UInt16).unwrap(), "\"uint16\"");
        let dtype: DType = serde_json::from_str("\"float64\"").unwrap();
        assert_eq!(dtype, DType::Float64);
        assert_eq!(DType::Object.byte_width(), None);
        assert_eq!(DType::Int64.byte_width(), Some(8));
    }

    #[test]
    fn test_filled_and_len() {
        let data = ArrayData::filled(DType::Int16, 3, -1.0).unwrap();
        assert_eq!(data, ArrayData::Int16(vec![-1, -1, -1]));
        assert_eq!(data.len(), 3);
        assert!(ArrayData::filled(DType::Object, 3, 0.0).is_err());

        let nan = ArrayData::filled(DType::Float32, 2, f64::NAN).unwrap();
        match nan {
            ArrayData::Float32(v) => assert!(v.iter().all(|x| x.is_nan())),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slice_rows() {
        let data = ArrayData::Utf8(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        assert_eq!(
            data.slice_rows(1, 3, 1),
            ArrayData::Utf8(vec!["b".into(), "c".into()])
        );

        let data = ArrayData::Int32(vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(data.slice_rows(2, 9, 2), ArrayData::Int32(vec![4, 5]));
    }

    #[test]
    fn test_default_like() {
        let chunk = ArrayData::Utf8(vec!["x".into()]);
        assert_eq!(
            chunk.default_like(2),
            ArrayData::Utf8(vec![String::new(), String::new()])
        );
        let chunk = ArrayData::Json(vec![Value::from(1)]);
        assert_eq!(chunk.default_like(1), ArrayData::Json(vec![Value::Null]));
    }

    #[test]
    fn test_to_json() {
        let data = ArrayData::Float64(vec![1.5, f64::NAN]);
        assert_eq!(data.to_json(), serde_json::json!([1.5, null]));
        let data = ArrayData::Bytes(vec![Bytes::from_static(b"\x01\x02")]);
        assert_eq!(data.to_json(), serde_json::json!([[1, 2]]));
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);

        stats.hits = 80;
        stats.misses = 20;
        assert!((stats.hit_rate() - 0.8).abs() < f64::EPSILON);
    }
}
