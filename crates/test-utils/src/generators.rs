//! Generators for synthetic container files and encoded chunks.
//!
//! Everything produced here is byte-exact and predictable, so tests can
//! assert on the exact ranges a reader requests.

use std::io::Write;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde_json::{json, Value};

/// Little-endian bytes of a slice of `f32`.
pub fn f32_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian bytes of a slice of `f64`.
pub fn f64_le_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian bytes of a slice of `i16`.
pub fn i16_le_bytes(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian bytes of a slice of `i32`.
pub fn i32_le_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `0.0, 1.0, 2.0, ...` of length `len`.
///
/// # Example
///
/// ```
/// use test_utils::ramp_f32;
///
/// assert_eq!(ramp_f32(3), vec![0.0, 1.0, 2.0]);
/// ```
pub fn ramp_f32(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32).collect()
}

/// Zlib-compress `data`.
pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish zlib stream")
}

/// Gzip-compress `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish gzip stream")
}

/// Encode records with the variable-length codec: each record is a
/// little-endian `u32` length followed by its bytes.
pub fn vlen_encode<T: AsRef<[u8]>>(records: &[T]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        let bytes = record.as_ref();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

/// Encode values with the JSON object codec: the flat values followed by
/// the dtype and shape of the encoded array.
pub fn json2_encode(values: &[Value], shape: &[u64]) -> Vec<u8> {
    let mut items = values.to_vec();
    items.push(json!("|O"));
    items.push(json!(shape));
    Value::Array(items).to_string().into_bytes()
}

/// Assemble an NH5 file whose payload starts exactly at `data_position`.
///
/// The header JSON is padded with spaces to reach that offset.
///
/// # Panics
///
/// If `data_position` is too small to hold the prefix and header, or falls
/// where the length field gains a digit (e.g. 109).
pub fn nh5_file(header: &Value, data_position: usize, payload: &[u8]) -> Vec<u8> {
    let json = header.to_string();
    let mut length = json.len();
    for _ in 0..4 {
        let prefix = format!("nh5|1|{}|", length);
        assert!(
            prefix.len() + json.len() <= data_position,
            "data position {} cannot hold a {} byte header",
            data_position,
            json.len()
        );
        if prefix.len() + length == data_position {
            let mut out = prefix.into_bytes();
            out.extend_from_slice(json.as_bytes());
            out.resize(data_position, b' ');
            out.extend_from_slice(payload);
            return out;
        }
        length = data_position - prefix.len();
    }
    panic!("no header length places the payload at {}", data_position);
}

/// Builder for NH5 files with little-endian numeric datasets laid out back
/// to back in the payload.
///
/// # Example
///
/// ```
/// use test_utils::Nh5Builder;
///
/// let file = Nh5Builder::new()
///     .group("/", serde_json::json!({"rate": 30000}))
///     .dataset_f32("/x", &[4], &[1.0, 2.0, 3.0, 4.0])
///     .build_at(400);
/// assert_eq!(file.len(), 400 + 16);
/// ```
#[derive(Debug, Default, Clone)]
pub struct Nh5Builder {
    groups: Vec<Value>,
    datasets: Vec<Value>,
    payload: Vec<u8>,
}

impl Nh5Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, path: &str, attrs: Value) -> Self {
        self.groups.push(json!({"path": path, "attrs": attrs}));
        self
    }

    /// Append a dataset whose bytes are already encoded.
    pub fn dataset_bytes(mut self, path: &str, dtype: &str, shape: &[u64], bytes: &[u8]) -> Self {
        self.datasets.push(json!({
            "path": path,
            "attrs": {},
            "dtype": dtype,
            "shape": shape,
            "position": self.payload.len(),
        }));
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn dataset_f32(self, path: &str, shape: &[u64], values: &[f32]) -> Self {
        self.dataset_bytes(path, "float32", shape, &f32_le_bytes(values))
    }

    pub fn dataset_i16(self, path: &str, shape: &[u64], values: &[i16]) -> Self {
        self.dataset_bytes(path, "int16", shape, &i16_le_bytes(values))
    }

    pub fn header(&self) -> Value {
        json!({"groups": self.groups, "datasets": self.datasets})
    }

    /// Build the file with the payload starting at `data_position`.
    pub fn build_at(&self, data_position: usize) -> Vec<u8> {
        nh5_file(&self.header(), data_position, &self.payload)
    }
}

/// Per-bin envelope of a synthetic recording.
///
/// Bin `b`, channel `c` has minimum `-(c + 1)` and maximum `b`, so its
/// height is `b + c + 1`.
pub fn envelope(num_bins: usize, num_channels: usize) -> (Vec<f32>, Vec<f32>) {
    let mut min = Vec::with_capacity(num_bins * num_channels);
    let mut max = Vec::with_capacity(num_bins * num_channels);
    for bin in 0..num_bins {
        for channel in 0..num_channels {
            min.push(-((channel + 1) as f32));
            max.push(bin as f32);
        }
    }
    (min, max)
}

/// Expected height of bin `bin`, channel `channel` from [`envelope`].
pub fn envelope_height(bin: usize, channel: usize) -> f32 {
    (bin + channel + 1) as f32
}
