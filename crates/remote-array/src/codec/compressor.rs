//! Byte-oriented chunk compressors.

use std::io::Read;

use crate::error::{RemoteArrayError, Result};

use super::CodecSpec;

/// Undo the compressor named by `spec`. Without a compressor the bytes pass
/// through untouched.
pub fn decompress(spec: Option<&CodecSpec>, data: &[u8]) -> Result<Vec<u8>> {
    let Some(spec) = spec else {
        return Ok(data.to_vec());
    };

    let mut decompressed = Vec::new();
    match spec.id.as_str() {
        "zlib" => {
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| RemoteArrayError::corrupt(format!("zlib: {}", e)))?;
        }
        "gzip" => {
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| RemoteArrayError::corrupt(format!("gzip: {}", e)))?;
        }
        other => return Err(RemoteArrayError::UnsupportedCompressor(other.to_string())),
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn spec(id: &str) -> CodecSpec {
        CodecSpec::new(id)
    }

    #[test]
    fn test_zlib_and_gzip() {
        let original = b"chunk payload chunk payload";

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(original).unwrap();
        let compressed = zlib.finish().unwrap();
        assert_eq!(decompress(Some(&spec("zlib")), &compressed).unwrap(), original);

        let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
        gzip.write_all(original).unwrap();
        let compressed = gzip.finish().unwrap();
        assert_eq!(decompress(Some(&spec("gzip")), &compressed).unwrap(), original);
    }

    #[test]
    fn test_passthrough_without_compressor() {
        assert_eq!(decompress(None, &[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_compressor() {
        let err = decompress(Some(&spec("blosc")), &[0]).unwrap_err();
        assert_eq!(err, RemoteArrayError::UnsupportedCompressor("blosc".into()));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = decompress(Some(&spec("zlib")), b"not zlib").unwrap_err();
        assert!(matches!(err, RemoteArrayError::CorruptChunk(_)));
    }
}
