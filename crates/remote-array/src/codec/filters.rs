//! Object-array filters: variable-length strings and bytes, and JSON.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{RemoteArrayError, Result};
use crate::types::ArrayData;

use super::CodecSpec;

/// Decode an object chunk with its single filter.
pub fn decode_object(filters: &[CodecSpec], data: &[u8]) -> Result<ArrayData> {
    let filter = match filters {
        [filter] => filter,
        [] => {
            return Err(RemoteArrayError::UnsupportedFilter(
                "object chunk without a filter".to_string(),
            ))
        }
        many => {
            let ids: Vec<&str> = many.iter().map(|f| f.id.as_str()).collect();
            return Err(RemoteArrayError::UnsupportedFilter(ids.join(",")));
        }
    };

    match filter.id.as_str() {
        "vlen-utf8" => decode_vlen_utf8(data).map(ArrayData::Utf8),
        "vlen-bytes" => decode_vlen_bytes(data).map(ArrayData::Bytes),
        "json2" => decode_json2(data).map(ArrayData::Json),
        other => Err(RemoteArrayError::UnsupportedFilter(other.to_string())),
    }
}

/// Split a buffer of `u32` little-endian length-prefixed records.
fn vlen_records(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let prefix = data.get(pos..pos + 4).ok_or_else(|| {
            RemoteArrayError::corrupt(format!(
                "dangling length prefix at byte {} of {}",
                pos,
                data.len()
            ))
        })?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        pos += 4;

        let record = data.get(pos..pos + len).ok_or_else(|| {
            RemoteArrayError::corrupt(format!(
                "record of {} bytes at byte {} runs past the end of a {} byte chunk",
                len,
                pos,
                data.len()
            ))
        })?;
        records.push(record);
        pos += len;
    }
    Ok(records)
}

pub fn decode_vlen_utf8(data: &[u8]) -> Result<Vec<String>> {
    vlen_records(data)?
        .into_iter()
        .map(|r| {
            String::from_utf8(r.to_vec())
                .map_err(|e| RemoteArrayError::corrupt(format!("vlen-utf8: {}", e)))
        })
        .collect()
}

pub fn decode_vlen_bytes(data: &[u8]) -> Result<Vec<Bytes>> {
    Ok(vlen_records(data)?
        .into_iter()
        .map(Bytes::copy_from_slice)
        .collect())
}

/// The document is `[v0, v1, ..., dtype, shape]`; only the values are kept.
pub fn decode_json2(data: &[u8]) -> Result<Vec<Value>> {
    let doc: Value = serde_json::from_slice(data)
        .map_err(|e| RemoteArrayError::corrupt(format!("json2: {}", e)))?;
    let Value::Array(mut items) = doc else {
        return Err(RemoteArrayError::corrupt("json2 chunk is not a JSON array"));
    };
    if items.len() < 2 {
        return Err(RemoteArrayError::corrupt(format!(
            "json2 chunk has {} elements, expected at least the dtype and shape",
            items.len()
        )));
    }
    items.truncate(items.len() - 2);
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vlen(records: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in records {
            out.extend_from_slice(&(r.len() as u32).to_le_bytes());
            out.extend_from_slice(r);
        }
        out
    }

    #[test]
    fn test_vlen_utf8_with_empty_strings() {
        let data = vlen(&[b"", b"spike", b"", "\u{3bc}V".as_bytes()]);
        let values = decode_vlen_utf8(&data).unwrap();
        assert_eq!(values, vec!["", "spike", "", "\u{3bc}V"]);
    }

    #[test]
    fn test_vlen_empty_buffer() {
        assert!(decode_vlen_utf8(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_vlen_truncated() {
        let mut data = vlen(&[b"abc"]);
        data.pop();
        assert!(matches!(
            decode_vlen_utf8(&data),
            Err(RemoteArrayError::CorruptChunk(_))
        ));

        // two stray bytes after a complete record
        let mut data = vlen(&[b"abc"]);
        data.extend_from_slice(&[1, 0]);
        assert!(matches!(
            decode_vlen_bytes(&data),
            Err(RemoteArrayError::CorruptChunk(_))
        ));
    }

    #[test]
    fn test_vlen_invalid_utf8() {
        let data = vlen(&[&[0xff, 0xfe]]);
        assert!(matches!(
            decode_vlen_utf8(&data),
            Err(RemoteArrayError::CorruptChunk(_))
        ));
        assert_eq!(
            decode_vlen_bytes(&data).unwrap(),
            vec![Bytes::from_static(&[0xff, 0xfe])]
        );
    }

    #[test]
    fn test_json2_strips_dtype_and_shape() {
        let data = br#"["a","b","int64","[2]"]"#;
        assert_eq!(decode_json2(data).unwrap(), vec![json!("a"), json!("b")]);

        assert!(decode_json2(br#"["|O"]"#).is_err());
        assert!(decode_json2(br#"{"a": 1}"#).is_err());
    }

    #[test]
    fn test_filter_selection() {
        let data = vlen(&[b"x"]);
        let utf8 = [CodecSpec::new("vlen-utf8")];
        assert_eq!(
            decode_object(&utf8, &data).unwrap(),
            ArrayData::Utf8(vec!["x".into()])
        );

        assert!(matches!(
            decode_object(&[], &data),
            Err(RemoteArrayError::UnsupportedFilter(_))
        ));
        assert_eq!(
            decode_object(&[CodecSpec::new("pickle")], &data),
            Err(RemoteArrayError::UnsupportedFilter("pickle".into()))
        );
        let two = [CodecSpec::new("vlen-utf8"), CodecSpec::new("json2")];
        assert!(matches!(
            decode_object(&two, &data),
            Err(RemoteArrayError::UnsupportedFilter(_))
        ));
    }
}
