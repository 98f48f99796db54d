//! Request caching and coalescing.

mod request_cache;

pub use request_cache::RequestCache;
