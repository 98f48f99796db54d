//! Byte-range fetching.
//!
//! Every adapter reaches the network through [`RangeFetcher`]. The trait is
//! the seam where tests substitute [`MemoryRangeFetcher`] for the real
//! [`HttpRangeFetcher`].

mod http;
mod memory;

pub use http::HttpRangeFetcher;
pub use memory::{FetchRecord, MemoryRangeFetcher};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Fetches raw bytes from remote objects.
///
/// Implementations must not retry: retry policy belongs to the caller.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Fetch bytes `start..=end_inclusive` of `url`.
    ///
    /// The result may be shorter than requested when the range runs past
    /// the end of the object, never longer. Cancelling `cancel` aborts the
    /// transfer and fails with `Cancelled`.
    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end_inclusive: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes>;

    /// Fetch a whole object, `None` if it does not exist.
    async fn fetch_object(&self, url: &str, cancel: &CancellationToken) -> Result<Option<Bytes>>;
}

/// Join a store base URL and a key.
pub fn join_url(base: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), key)
}
