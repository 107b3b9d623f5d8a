//! Service layer for the snapgrep engine: snapshot store and fetch
//! pipeline, fetch concurrency limiter, configuration, and the HTTP API.

pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod limiter;
pub mod service;
pub mod store;

pub use crate::config::{load_config, MergeOpts, ServeConfig};
pub use crate::error::StoreError;
pub use crate::fetch::{ArchiveSource, FetchError, GitArchiveSource, HttpArchiveSource};
pub use crate::limiter::FetchLimiter;
pub use crate::service::{SearchRequest, SearchResponse, SearchService};
pub use crate::store::{SnapshotStore, StoreOpts};
