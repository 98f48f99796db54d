//! Error types for remote array access.

use thiserror::Error;

/// Errors that can occur while reading a remote array source.
///
/// A path that is simply absent from a source is not an error: reads return
/// `Ok(None)` for it. The enum is `Clone` so that every caller waiting on a
/// coalesced request receives the same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteArrayError {
    /// Metadata could not be parsed or does not have the expected shape.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// Chunk bytes were received but could not be decoded.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    /// The chunk uses a filter this client does not implement.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// The chunk uses a compressor this client does not implement.
    #[error("unsupported compressor: {0}")]
    UnsupportedCompressor(String),

    /// More slice dimensions were requested than the adapter supports.
    #[error("slicing {requested} dimensions is not supported (at most {supported})")]
    UnsupportedSlice { requested: usize, supported: usize },

    /// The slice does not fit the dataset.
    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    /// No adapter matches the source.
    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Network or HTTP failure.
    #[error("fetch of {url} failed: {message}")]
    TransientFetchFailure { url: String, message: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RemoteArrayError {
    /// Create a MalformedMetadata error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMetadata(msg.into())
    }

    /// Create a CorruptChunk error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptChunk(msg.into())
    }

    /// Create an InvalidSlice error.
    pub fn invalid_slice(msg: impl Into<String>) -> Self {
        Self::InvalidSlice(msg.into())
    }

    /// Create a TransientFetchFailure error.
    pub fn fetch_failed(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientFetchFailure {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Whether this failure may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetchFailure { .. })
    }
}

impl From<std::io::Error> for RemoteArrayError {
    fn from(err: std::io::Error) -> Self {
        Self::CorruptChunk(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteArrayError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMetadata(err.to_string())
    }
}

impl From<base64::DecodeError> for RemoteArrayError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedMetadata(format!("invalid base64 reference: {}", err))
    }
}

/// Result type for remote array operations.
pub type Result<T> = std::result::Result<T, RemoteArrayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteArrayError::fetch_failed("http://a", "503").is_transient());
        assert!(!RemoteArrayError::Cancelled.is_transient());
        assert!(!RemoteArrayError::malformed("x").is_transient());
    }

    #[test]
    fn test_serde_error_maps_to_malformed() {
        let err: RemoteArrayError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RemoteArrayError::MalformedMetadata(_)));
    }

    #[test]
    fn test_unsupported_slice_message() {
        let err = RemoteArrayError::UnsupportedSlice {
            requested: 3,
            supported: 2,
        };
        assert_eq!(
            err.to_string(),
            "slicing 3 dimensions is not supported (at most 2)"
        );
    }
}
