//! Client-side data cache for the VS-Hub concept set API.
//!
//! [`DataCache`] holds one nested JSON tree per session and saves it,
//! compressed, to a [`StorageBackend`]. [`DataGetter`] sits on top and turns
//! "give me these concepts" into at most one server call for whatever is not
//! cached yet.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod transport;

pub use cache::{
  CacheHistoryEvent, CacheOptions, CachePath, CacheStats, DataCache, MemoryBackend, SqliteBackend,
  StorageBackend,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetch::{
  CacheSource, CompoundParams, DataGetter, EntityKind, FetchParams, FetchResult, Key, RequestPlan,
};
pub use transport::{HttpTransport, Transport};
