//! Remote Hierarchical Array Access
//!
//! This crate presents groups, datasets, attributes and typed N-dimensional
//! arrays stored remotely in one of four container encodings, without ever
//! downloading a file in full:
//!
//! - **NH5**: a JSON header followed by contiguous dataset blobs
//! - **Consolidated chunked store**: Zarr v2 with a `.zmetadata` document
//! - **Reference filesystem**: a manifest mapping store keys to inline
//!   values or byte ranges of other files
//! - **Reference filesystem with links**: the same, plus datasets that point
//!   at datasets in other files
//!
//! # Architecture
//!
//! ```text
//! ClientRegistry::get_client(url)
//!      │
//!      ▼
//! RemoteClient (one per url + format)
//!      │
//!      ├─► get_group / get_dataset: answered from metadata loaded at open
//!      │
//!      └─► get_dataset_data(path, slice)
//!               │
//!               ├─► Validate slice (no I/O on failure)
//!               │
//!               ├─► Resolve chunk keys through the manifest
//!               │         │
//!               │         ├─► Cached: return decoded chunk
//!               │         │
//!               │         ├─► In flight: wait for the same fetch
//!               │         │
//!               │         └─► Miss: byte-range request, then decode
//!               │
//!               └─► Assemble the selection
//! ```
//!
//! # Example
//!
//! ```ignore
//! use remote_array::{ArrayClient, ClientConfig, ClientRegistry, ReadOptions};
//!
//! let registry = ClientRegistry::with_http(ClientConfig::from_env())?;
//! let client = registry.get_client("https://host/session.nwb.lindi.json", None).await?;
//!
//! let group = client.get_group("/acquisition").unwrap();
//! let options = ReadOptions::new().with_slice(vec![(0, 1000)]);
//! let data = client.get_dataset_data("/acquisition/ts/data", &options).await?;
//! ```

pub mod adapter;
pub mod binned;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod registry;
pub mod resolver;
pub mod slice;
pub mod types;

// Re-export commonly used types at crate root
pub use adapter::{ArrayClient, ExternalLink, RemoteClient, SourceFormat};
pub use binned::BinnedArrayClient;
pub use config::ClientConfig;
pub use error::{RemoteArrayError, Result};
pub use fetch::{FetchRecord, HttpRangeFetcher, MemoryRangeFetcher, RangeFetcher};
pub use registry::ClientRegistry;
pub use types::{
    ArrayData, Attributes, ByteOrder, CacheStats, DType, DatasetDescriptor, DatasetEntry,
    GroupDescriptor, ReadOptions, SubgroupEntry,
};
