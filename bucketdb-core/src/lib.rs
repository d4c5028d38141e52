//! BucketDB Core - Time-Series Bucketing Engine
//!
//! A layer over a general-purpose document store that presents a
//! conventional per-document collection interface while internally
//! grouping inserts into time-windowed, optionally compressed buckets.
//!
//! # Architecture
//!
//! - **Codec**: bucket payload encode/decode, raw or LZ4-compressed
//! - **Bucket**: one time window's accumulated documents plus metadata
//! - **Bucket store adapter**: persisted bucket records in an ordinary
//!   backing collection of the host store
//! - **Cache & eviction manager**: bounded set of resident buckets;
//!   historical windows are flushed before the hot one
//! - **Time-series front**: insert routing and reads that transparently
//!   merge resident and persisted buckets

pub mod bucket;
pub mod cache;
pub mod codec;
pub mod collection;
pub mod engine;
pub mod monitor;
pub mod store;

mod error;
mod types;

pub use collection::{CollectionConfig, FindCursor, InsertManyResult, Query, TimeSeriesCollection};
pub use engine::TimeSeriesEngine;
pub use error::{Result, TsError};
pub use types::*;

/// BucketDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Window width when `millis_in_batch` is not given (1 second)
    pub const DEFAULT_MILLIS_IN_BATCH: i64 = 1000;

    /// Resident bucket bound when `cache_size` is not given
    pub const DEFAULT_CACHE_SIZE: usize = 4;

    /// Time field when `time_field` is not given
    pub const DEFAULT_TIME_FIELD: &str = "_id";

    /// Suffix deriving a backing collection name from a collection name
    pub const BACKING_SUFFIX: &str = "_timeseries";

    /// Collection name prefixes reserved by the host store
    pub const RESERVED_NAME_PREFIXES: &[&str] = &["system."];
}
